pub mod constraints;
pub mod containers;
pub mod il;
pub mod inference_config;
pub mod inference_context;
pub mod lattice;
pub mod memory_order;
pub mod solver;
pub mod target;

pub mod log {
    //! Logging for inference runs. Every module logs through the
    //! `slog_scope` free macros re-exported here; the crate never installs
    //! a global logger of its own. Embedders wrap a run in
    //! `slog_scope::scope(&inference_logger(..), ..)` (or install any other
    //! `slog` logger) to see its records.

    pub use slog_scope::{crit, debug, error, info, trace, warn};

    /// Structured payload for the solver's bound-tightening records: the
    /// rendered candidate bound, the opposite bound it was checked against,
    /// and the class's incumbent bound on the same side when one exists.
    /// An absent incumbent stays out of the record rather than printing as
    /// `None`.
    pub struct TighteningKV {
        pub candidate: String,
        pub opposite: String,
        pub incumbent: Option<String>,
    }

    impl slog::KV for TighteningKV {
        fn serialize(
            &self,
            _record: &slog::Record,
            serializer: &mut dyn slog::Serializer,
        ) -> slog::Result {
            serializer.emit_str("candidate", &self.candidate)?;
            serializer.emit_str("opposite", &self.opposite)?;
            if let Some(incumbent) = &self.incumbent {
                serializer.emit_str("incumbent", incumbent)?;
            }
            Ok(())
        }
    }

    /// Where [`inference_logger`] sends records.
    pub enum LogSink {
        /// Compact, human-readable records on stderr.
        Terminal,
        /// Newline-delimited JSON, truncating any previous file contents.
        File(std::path::PathBuf),
        /// Drop everything. For tests that only exercise the plumbing.
        Discard,
    }

    fn severity(verbosity: usize) -> sloggers::types::Severity {
        match verbosity {
            0 => sloggers::types::Severity::Warning,
            1 => sloggers::types::Severity::Info,
            2 => sloggers::types::Severity::Debug,
            _ => sloggers::types::Severity::Trace,
        }
    }

    /// Build a root logger for an inference run at the given verbosity
    /// (0 = warnings only, 3 and up = full trace). Constraint dumps and
    /// per-branch solver records sit at debug and trace, so verbosity 2 is
    /// the usual setting when chasing an unexpected inference result.
    pub fn inference_logger(verbosity: usize, sink: LogSink) -> slog::Logger {
        use sloggers::Build;

        match sink {
            LogSink::Terminal => sloggers::terminal::TerminalLoggerBuilder::new()
                .destination(sloggers::terminal::Destination::Stderr)
                .format(sloggers::types::Format::Compact)
                .level(severity(verbosity))
                .overflow_strategy(sloggers::types::OverflowStrategy::Block)
                .build()
                .unwrap(),
            LogSink::File(path) => sloggers::file::FileLoggerBuilder::new(path)
                .truncate()
                .format(sloggers::types::Format::Json)
                .level(severity(verbosity))
                .overflow_strategy(sloggers::types::OverflowStrategy::Block)
                .build()
                .unwrap(),
            LogSink::Discard => sloggers::null::NullLoggerBuilder.build().unwrap(),
        }
    }
}
