use std::fmt;

pub(crate) mod codec;
pub(crate) mod engine;
pub(crate) mod table;
pub(crate) mod wt210;
pub(crate) mod wt310;

#[cfg(test)]
pub(crate) mod fake;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("cannot open device '{devnode}': {reason}")]
    Connection { devnode: String, reason: String },

    #[error("'{devnode}' is not a {kind} device")]
    WrongDeviceClass {
        devnode: String,
        kind: &'static str,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("time out while reading from device '{0}'")]
    Timeout(String),

    #[error("bad command '{0}'")]
    BadCommand(String),

    #[error("command '{cmd}' accepts no arguments, but '{arg}' was provided")]
    NoArgument { cmd: String, arg: String },

    #[error("unacceptable argument '{arg}' for command '{cmd}', use: {expected}")]
    BadArgument {
        cmd: String,
        arg: String,
        expected: String,
    },

    #[error("unexpected power meter response '{response}' to the '{raw_cmd}' command")]
    BadResponse { raw_cmd: String, response: String },

    #[error("command '{cmd}' failed: {msg}")]
    Device { cmd: String, msg: String },

    #[error("{0}")]
    State(String),

    #[error("no help text for '{0}'")]
    NoHelp(String),

    #[error("device does not look like a {model}: {reason}")]
    Probe {
        model: &'static str,
        reason: String,
    },

    #[error("unknown type of the device '{devnode}', here is the log of all the attempts to recognize it:\n{details}")]
    AutoDetect { devnode: String, details: String },
}

impl ProtoError {
    /// Prefix an I/O error with call context, keeping the error kind intact.
    pub(crate) fn context(self, ctx: &str) -> Self {
        match self {
            ProtoError::Io { context, source } => ProtoError::Io {
                context: format!("{ctx}:\n{context}"),
                source,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtoError>;

/// A command argument or response. Most commands deal in single string
/// values; `configure-data-items` takes a list and `read-data` returns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    List(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::List(_) => None,
        }
    }

    pub fn into_list(self) -> Vec<String> {
        match self {
            Value::Str(s) => vec![s],
            Value::List(l) => l,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::List(l) => f.write_str(&l.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(value)
    }
}

impl From<&[&str]> for Value {
    fn from(value: &[&str]) -> Self {
        Value::List(value.iter().map(|s| s.to_string()).collect())
    }
}

/// The supported power meter families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Wt310,
    Wt210,
}

impl Model {
    /// Probe order for auto-detection.
    pub(crate) const ALL: &'static [Model] = &[Model::Wt310, Model::Wt210];

    pub fn name(self) -> &'static str {
        match self {
            Model::Wt310 => wt310::NAME,
            Model::Wt210 => wt210::NAME,
        }
    }

    /// Model type strings accepted as a configuration hint.
    pub fn pmtypes(self) -> &'static [&'static str] {
        match self {
            Model::Wt310 => wt310::PMTYPES,
            Model::Wt210 => wt210::PMTYPES,
        }
    }

    pub(crate) fn max_data_items(self) -> usize {
        match self {
            Model::Wt310 => wt310::MAX_DATA_ITEMS,
            Model::Wt210 => wt210::MAX_DATA_ITEMS,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
