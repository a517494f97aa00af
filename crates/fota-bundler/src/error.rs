use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Process {
        command: String,
        code: Option<i32>,
    },
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: ErrorKind::Config,
            msg: msg.into(),
        }
    }

    pub fn io<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: ErrorKind::Io,
            msg: msg.into(),
        }
    }

    pub fn process<C: Into<String>, M: Into<String>>(command: C, code: Option<i32>, msg: M) -> Self {
        Self {
            kind: ErrorKind::Process {
                command: command.into(),
                code,
            },
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn is_config(&self) -> bool {
        matches!(self.kind, ErrorKind::Config)
    }

    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    pub fn is_process(&self) -> bool {
        matches!(self.kind, ErrorKind::Process { .. })
    }

    // Process failures surface the tool's own exit code where there is one.
    pub fn exit_code(&self) -> i32 {
        match &self.kind {
            ErrorKind::Config => 2,
            ErrorKind::Process { code, .. } => code.filter(|c| *c != 0).unwrap_or(1),
            ErrorKind::Io => 1,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Config => write!(f, "configuration error: {}", self.msg),
            ErrorKind::Process {
                command,
                code: Some(code),
            } => write!(f, "{} (exit code {code}): {command}", self.msg),
            ErrorKind::Process {
                command,
                code: None,
            } => write!(f, "{}: {command}", self.msg),
            ErrorKind::Io => write!(f, "{}", self.msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
