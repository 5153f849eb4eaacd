use std::io::Write;
use std::fs::File;

/// Log levels, lowest-to-highest verbosity. A `Logger` built with
/// verbosity `N` emits every level `<= N`.
pub const LEVEL_ERROR: u32 = 0;
pub const LEVEL_WARN: u32 = 1;
pub const LEVEL_INFO: u32 = 2;
pub const LEVEL_DEBUG: u32 = 3;

/// A simple logger attached to a volume. No `log`/`tracing` facade — the
/// engine writes directly through this the same way the teacher's CLI
/// writes through its own hand-rolled `Logger`.
#[derive(Debug)]
pub struct Logger {
    verbosity: u32,
    log_file: Option<File>
}

impl Logger {
    /// Create a new logger.
    pub fn new(verbosity: u32, log_file: Option<File>) -> Self
    {
        Self {
            verbosity,
            log_file,
        }
    }

    /// Log a message, with a specified level.
    /// Logs also into the log file, if present.
    pub fn log(&mut self, level: u32, msg: &str)
    {
        if self.verbosity >= level {
            eprintln!("{}", msg);

            if let Some(log_file) = &mut self.log_file {
                writeln!(log_file, "{}", msg).unwrap_or_else(|_| {
                    eprintln!("error: couldn't write into the log file")
                });
            }
        }
    }

    pub fn error(&mut self, msg: &str)
    {
        self.log(LEVEL_ERROR, msg);
    }

    /// Used for once-per-anchor notices such as the dampener falling back
    /// to `V' = 1` (spec.md §4.2 Open Question) — informational, never an
    /// error, but worth a trace.
    pub fn warn(&mut self, msg: &str)
    {
        self.log(LEVEL_WARN, msg);
    }

    pub fn info(&mut self, msg: &str)
    {
        self.log(LEVEL_INFO, msg);
    }

    pub fn debug(&mut self, msg: &str)
    {
        self.log(LEVEL_DEBUG, msg);
    }
}
