//! Module argument strings.

use std::ffi::CString;
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, BridgeResult};

/// An ordered, immutable list of argument tokens for one module call.
///
/// Built with the consuming builder methods and passed by reference to
/// dispatch; nothing changes it afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleArgs {
    tokens: Vec<String>,
}

impl ModuleArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw token.
    pub fn arg(mut self, token: impl Into<String>) -> Self {
        self.tokens.push(token.into());
        self
    }

    /// Appends `-{flag}{value}`, e.g. `flag('R', region)` gives `-R0/10/0/10`.
    pub fn flag(self, flag: char, value: impl fmt::Display) -> Self {
        self.arg(format!("-{}{}", flag, value))
    }

    /// Appends `-{flag}` with no value.
    pub fn switch(self, flag: char) -> Self {
        self.arg(format!("-{}", flag))
    }

    /// Appends `->{name}`, redirecting module output to a file or virtual
    /// file.
    pub fn output(self, name: impl fmt::Display) -> Self {
        self.arg(format!("->{}", name))
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Returns true if any token mentions `name`.
    pub fn references(&self, name: &str) -> bool {
        !name.is_empty() && self.tokens.iter().any(|t| t.contains(name))
    }

    /// Renders the single argument string handed to `GMT_Call_Module`.
    ///
    /// Tokens containing whitespace are double-quoted. Empty tokens, NUL
    /// bytes and whitespace tokens that themselves contain a double quote
    /// cannot be expressed and are rejected.
    pub fn to_command_line(&self) -> BridgeResult<CString> {
        let mut rendered = Vec::with_capacity(self.tokens.len());
        for token in &self.tokens {
            if token.is_empty() {
                return Err(BridgeError::invalid_argument("empty argument token"));
            }
            if token.contains('\0') {
                return Err(BridgeError::invalid_argument(format!(
                    "argument token {:?} contains a NUL byte",
                    token
                )));
            }
            if token.chars().any(char::is_whitespace) {
                if token.contains('"') {
                    return Err(BridgeError::invalid_argument(format!(
                        "argument token {:?} mixes whitespace and double quotes",
                        token
                    )));
                }
                rendered.push(format!("\"{}\"", token));
            } else {
                rendered.push(token.clone());
            }
        }
        CString::new(rendered.join(" "))
            .map_err(|e| BridgeError::invalid_argument(format!("argument string: {}", e)))
    }
}

impl fmt::Display for ModuleArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))
    }
}

impl FromStr for ModuleArgs {
    type Err = BridgeError;

    /// Splits on whitespace, keeping double-quoted runs together.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut started = false;
        for c in s.chars() {
            match c {
                '"' => {
                    quoted = !quoted;
                    started = true;
                }
                c if c.is_whitespace() && !quoted => {
                    if started {
                        tokens.push(std::mem::take(&mut current));
                        started = false;
                    }
                }
                c => {
                    current.push(c);
                    started = true;
                }
            }
        }
        if quoted {
            return Err(BridgeError::invalid_argument(format!("unbalanced quote in {:?}", s)));
        }
        if started {
            tokens.push(current);
        }
        Ok(Self { tokens })
    }
}

impl<S: Into<String>> FromIterator<S> for ModuleArgs {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Checks a module name before it reaches the engine.
pub(crate) fn validate_module_name(module: &str) -> BridgeResult<CString> {
    if module.is_empty() || module.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(BridgeError::invalid_argument(format!("invalid module name {:?}", module)));
    }
    CString::new(module).map_err(|e| BridgeError::invalid_argument(format!("module name: {}", e)))
}
