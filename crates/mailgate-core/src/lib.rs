//! mailgate Core - module registry and message checks
//!
//! This crate turns declared configuration into running module instances
//! and runs stateless acceptance checks against inbound messages,
//! producing verdicts the protocol layer can turn into reply lines.

pub mod builtin;
pub mod check;
pub mod dns;
pub mod module;
pub mod reply;
pub mod storage;

pub use builtin::{builtin_registry, register_builtins};
pub use check::{
    Cancelled, Check, CheckContext, CheckExecutionError, CheckOutcome, CheckPipeline,
    CheckResult, CheckStage, ConnState, Disposition, FailAction, MessageMeta, StatelessCheck,
    StatelessStages, TlsState, Verdict,
};
pub use dns::{
    Dns01Solver, DnsError, DnsRecord, MemoryProvider, ProviderModule, RecordAppender,
    RecordDeleter, RecordProvider,
};
pub use module::{Factory, ModuleArgs, ModuleInstance, ModuleKind, ModuleSet, Registry, RegistryBuilder};
pub use reply::{EnhancedCode, SmtpReply, StructuredError};
