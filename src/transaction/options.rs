use std::fmt;

use crate::context::Context;
use crate::logging::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    #[default]
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A single override applied over [`TxOptions`] defaults.
#[derive(Debug, Clone)]
pub enum TxOpt {
    ReadOnly,
    Isolation(IsolationLevel),
    Logger(Logger),
    Context(Context),
}

pub fn read_only() -> TxOpt {
    TxOpt::ReadOnly
}

pub fn with_isolation(level: IsolationLevel) -> TxOpt {
    TxOpt::Isolation(level)
}

/// Overrides the logger; pass [`Logger::discard`] to silence internal calls.
pub fn with_logger(logger: Logger) -> TxOpt {
    TxOpt::Logger(logger)
}

pub fn with_context(ctx: Context) -> TxOpt {
    TxOpt::Context(ctx)
}

/// Settings for one transactional execution.
///
/// Built once per call and not changed afterwards.
#[derive(Debug, Clone, Default)]
pub struct TxOptions {
    isolation: IsolationLevel,
    read_only: bool,
    logger: Logger,
    context: Context,
}

impl TxOptions {
    /// Defaults: serializable, read-write, default logger, background context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults bound to an existing logger and context (used by scoped facades).
    pub fn scoped(logger: Logger, context: Context) -> Self {
        Self {
            logger,
            context,
            ..Self::default()
        }
    }

    /// Applies `opts` in order; the last option touching a field wins.
    pub fn apply(mut self, opts: impl IntoIterator<Item = TxOpt>) -> Self {
        for opt in opts {
            match opt {
                TxOpt::ReadOnly => self.read_only = true,
                TxOpt::Isolation(level) => self.isolation = level,
                TxOpt::Logger(logger) => self.logger = logger,
                TxOpt::Context(ctx) => self.context = ctx,
            }
        }
        self
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}
