use snafu::Snafu;
use zmora_dtype::DType;

use crate::expr::BinaryOp;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Binary operands must agree on dtype.
    #[snafu(display("dtype mismatch in {op:?}: {lhs} vs {rhs}"))]
    BinaryDTypeMismatch { op: BinaryOp, lhs: DType, rhs: DType },

    /// Void and Handle never participate in arithmetic.
    #[snafu(display("{dtype} cannot appear in arithmetic"))]
    NonArithmeticDType { dtype: DType },

    /// Reduce needs at least one source expression.
    #[snafu(display("reduce requires at least one source"))]
    EmptyReduce,

    /// Realize bounds must cover every tensor dimension indexed.
    #[snafu(display("bounds rank {bounds} does not match index rank {indices}"))]
    BoundsRankMismatch { bounds: usize, indices: usize },
}
