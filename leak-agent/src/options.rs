//! Agent option parsing
//!
//! Options arrive as one comma separated string, e.g. `threshold=200,maxframes=8`.

use std::path::PathBuf;

use crate::error::AgentError;

pub const USAGE: &str = "\
Usage: leak-agent options are comma separated
  help                   Show this message and refuse to start
  threshold=N            Log a dump whenever more than N handles are open
  trace=FILE             Append every open/close event to FILE
  maxframes=N            Keep at most N backtrace frames per handle (default 32)
  excludes=P1;P2         Do not record handles whose description starts with P1 or P2";

const DEFAULT_MAX_FRAMES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub threshold: Option<usize>,
    pub trace: Option<PathBuf>,
    pub max_frames: usize,
    pub excludes: Vec<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            threshold: None,
            trace: None,
            max_frames: DEFAULT_MAX_FRAMES,
            excludes: Vec::new(),
        }
    }
}

impl AgentOptions {
    pub fn parse(raw: &str) -> Result<Self, AgentError> {
        let mut options = Self::default();

        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = match item.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (item, None),
            };

            match (key, value) {
                ("help", None) => return Err(AgentError::Usage),
                ("threshold", Some(v)) => options.threshold = Some(parse_count(key, v)?),
                ("maxframes", Some(v)) => options.max_frames = parse_count(key, v)?,
                ("trace", Some(v)) if !v.is_empty() => options.trace = Some(PathBuf::from(v)),
                ("excludes", Some(v)) => {
                    options.excludes = v
                        .split(';')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect();
                }
                ("threshold" | "maxframes" | "trace" | "excludes", _) | ("help", Some(_)) => {
                    return Err(AgentError::InvalidValue {
                        option: key.to_string(),
                        value: value.unwrap_or_default().to_string(),
                    })
                }
                _ => return Err(AgentError::UnknownOption(item.to_string())),
            }
        }

        Ok(options)
    }

    pub(crate) fn is_excluded(&self, description: &str) -> bool {
        self.excludes.iter().any(|p| description.starts_with(p.as_str()))
    }
}

fn parse_count(option: &str, value: &str) -> Result<usize, AgentError> {
    value.parse().map_err(|_| AgentError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    })
}
