//! Human-readable messages for Download Station API error codes.

use std::fmt;

/// API family an error code was returned from. Codes 400+ overlap between
/// namespaces, so the namespace picks the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiNamespace {
    Auth,
    DownloadStationTask,
}

impl ApiNamespace {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "Auth",
            Self::DownloadStationTask => "DownloadStation.Task",
        }
    }
}

impl fmt::Display for ApiNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codes shared by every API.
fn common_message(code: i64) -> Option<&'static str> {
    Some(match code {
        100 => "Unknown error",
        101 => "Invalid parameter",
        102 => "The requested API does not exist",
        103 => "The requested method does not exist",
        104 => "The requested version does not support the functionality",
        105 => "The logged in session does not have permission",
        106 => "Session timeout",
        107 => "Session interrupted by duplicate login",
        119 => "SID not found",
        _ => return None,
    })
}

fn auth_message(code: i64) -> Option<&'static str> {
    Some(match code {
        400 => "No such account or incorrect password",
        401 => "Account disabled",
        402 => "Permission denied",
        403 => "2-step verification code required",
        404 => "Failed to authenticate 2-step verification code",
        _ => return None,
    })
}

fn task_message(code: i64) -> Option<&'static str> {
    Some(match code {
        400 => "File upload failed",
        401 => "Max number of tasks reached",
        402 => "Destination denied",
        403 => "Destination does not exist",
        404 => "Invalid task id",
        405 => "Invalid task action",
        406 => "No default destination",
        407 => "Set destination failed",
        408 => "File does not exist",
        _ => return None,
    })
}

/// Message for `code`: the namespace table first, then the common table,
/// then a generic fallback that still names the code.
#[must_use]
pub fn error_message_from_code(code: i64, namespace: ApiNamespace) -> String {
    let specific = match namespace {
        ApiNamespace::Auth => auth_message(code),
        ApiNamespace::DownloadStationTask => task_message(code),
    };
    specific
        .or_else(|| common_message(code))
        .map_or_else(|| format!("Unknown error (code {code})"), str::to_owned)
}

/// Codes after which the cached session id must be discarded.
#[must_use]
pub fn is_session_error(code: i64) -> bool {
    matches!(code, 105..=107 | 119)
}
