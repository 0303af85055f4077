//! Docker Engine API payloads
//!
//! Only the fields this crate reads or writes are modelled; everything else
//! in the engine's JSON is ignored.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// One line of the `POST /images/create` progress stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullFrame {
    #[serde(default)]
    pub status: String,
    /// Layer id (or, for the "Pulling from" banner, the tag)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "progressDetail",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub progress_detail: Option<FrameProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<FrameAux>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorDetail", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

impl PullFrame {
    /// Convenience constructor for a status-only frame
    pub fn status(status: impl Into<String>, id: Option<&str>) -> Self {
        Self {
            status: status.into(),
            id: id.map(str::to_string),
            ..Default::default()
        }
    }

    /// A status frame with byte counts
    pub fn progress(status: impl Into<String>, id: &str, current: i64, total: i64) -> Self {
        Self {
            status: status.into(),
            id: Some(id.to_string()),
            progress_detail: Some(FrameProgress {
                current: Some(current),
                total: Some(total),
            }),
            ..Default::default()
        }
    }

    /// Error reported in-band by the engine, if any
    pub fn error_message(&self) -> Option<String> {
        self.error_detail
            .as_ref()
            .and_then(|detail| detail.message.clone())
            .or_else(|| self.error.clone())
    }
}

/// Byte counts attached to a pull frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

/// Auxiliary data the engine attaches to some frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameAux {
    #[serde(rename = "Digest", default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of `POST /containers/{id}/exec`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreateRequest {
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
    pub cmd: Vec<String>,
}

impl ExecCreateRequest {
    /// stdout + stderr attached, no stdin, no TTY
    pub fn attached(cmd: Vec<String>) -> Self {
        Self {
            attach_stdin: false,
            attach_stdout: true,
            attach_stderr: true,
            tty: false,
            cmd,
        }
    }
}

/// Response of `POST /containers/{id}/exec`
#[derive(Debug, Clone, Deserialize)]
pub struct ExecCreated {
    #[serde(rename = "Id")]
    pub id: String,
}

/// Body of `POST /exec/{id}/start`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecStartRequest {
    pub detach: bool,
    pub tty: bool,
}

/// Response of `GET /exec/{id}/json`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecInspect {
    #[serde(rename = "ExitCode", default)]
    pub exit_code: Option<i64>,
    #[serde(rename = "Running", default)]
    pub running: bool,
}

impl ExecInspect {
    /// Exit code, once the process is known to have stopped
    pub fn settled_exit_code(&self) -> Option<i64> {
        if self.running {
            None
        } else {
            self.exit_code
        }
    }
}

/// `{"message": "..."}` body of engine errors
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

/// Registry credentials for `X-Registry-Auth`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serveraddress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identitytoken: Option<String>,
}

impl RegistryAuth {
    /// base64url(JSON) as the engine expects in the header
    pub fn header_value(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE.encode(json))
    }
}
