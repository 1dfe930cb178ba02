//! Compilation target and the scoped current-target stack.

use std::cell::RefCell;

/// Backend family a program is being lowered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Cuda,
    Llvm,
    C,
}

impl TargetKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Llvm => "llvm",
            Self::C => "c",
        }
    }
}

/// Compilation target. Extend with target attributes as backends need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetKind,
}

impl Target {
    pub const fn new(kind: TargetKind) -> Self {
        Self { kind }
    }

    pub const fn cuda() -> Self {
        Self::new(TargetKind::Cuda)
    }

    pub const fn llvm() -> Self {
        Self::new(TargetKind::Llvm)
    }

    /// The innermost target entered via [`with_target`], if any.
    pub fn current() -> Option<Target> {
        TARGET_STACK.with(|stack| stack.borrow().last().copied())
    }
}

// Lowering is single-threaded per invocation; a thread-local stack gives the
// same scoping as an RAII context object without the guard type.
thread_local! {
    static TARGET_STACK: RefCell<Vec<Target>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with `target` as the current target.
pub fn with_target<R>(target: Target, f: impl FnOnce() -> R) -> R {
    TARGET_STACK.with(|stack| stack.borrow_mut().push(target));
    let result = f();
    TARGET_STACK.with(|stack| {
        stack.borrow_mut().pop();
    });
    result
}
