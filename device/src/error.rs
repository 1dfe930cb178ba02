use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Device string could not be parsed.
    #[snafu(display("invalid device: {device}"))]
    InvalidDevice { device: String },
}
