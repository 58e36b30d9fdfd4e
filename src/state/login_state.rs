use std::fmt;

/// Authentication state of one browsing session
///
/// ```text
/// NoLoginRequired                        (terminal)
/// LoginRequired --success--> LoggedIn
/// LoginRequired --failure--> LoginFailed
/// LoginFailed   --success--> LoggedIn
/// LoggedIn      --verification fails--> LoginExpired
/// LoginExpired  --success--> LoggedIn
/// ```
///
/// `LoginFailed` and `LoginExpired` both mean "log in before the next use"; they
/// differ only in why the session got there, which the session logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginState {
    /// The definition declares no login block
    NoLoginRequired,
    /// Login has not been attempted yet
    LoginRequired,
    /// A logged-in session failed verification
    LoginExpired,
    /// The last login attempt failed
    LoginFailed,
    /// Login succeeded and was verified
    LoggedIn,
}

impl LoginState {
    /// Initial state for a session of a definition with or without a login block
    pub fn initial(has_login: bool) -> Self {
        if has_login {
            Self::LoginRequired
        } else {
            Self::NoLoginRequired
        }
    }

    /// True when the session must log in before it can be used
    pub fn needs_login(&self) -> bool {
        matches!(
            self,
            Self::LoginRequired | Self::LoginExpired | Self::LoginFailed
        )
    }

    /// True when the session can be used as-is
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::NoLoginRequired | Self::LoggedIn)
    }

    /// State after a verified login
    pub fn on_login_success(self) -> Self {
        match self {
            Self::NoLoginRequired => Self::NoLoginRequired,
            _ => Self::LoggedIn,
        }
    }

    /// State after a failed login attempt
    pub fn on_login_failure(self) -> Self {
        match self {
            Self::NoLoginRequired => Self::NoLoginRequired,
            _ => Self::LoginFailed,
        }
    }

    /// State after a logged-in session failed its verification probe
    pub fn on_verification_failure(self) -> Self {
        match self {
            Self::LoggedIn => Self::LoginExpired,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoLoginRequired => "no_login_required",
            Self::LoginRequired => "login_required",
            Self::LoginExpired => "login_expired",
            Self::LoginFailed => "login_failed",
            Self::LoggedIn => "logged_in",
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
