//! Desktop capture through an external command.
//!
//! The capture command is an argv template in which `{output}` is replaced by
//! a temporary PNG path; the tool writes the image there and the bytes are read
//! back. Platform defaults are `screencapture` on macOS, `grim` under Wayland,
//! ImageMagick `import` under X11 and a PowerShell snippet on Windows.

use async_trait::async_trait;
use runner_proto::{CaptureError, CapturedImage, SamplerUnavailable, ScreenCapture};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Placeholder substituted with the output file path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

const WINDOWS_CAPTURE_SCRIPT: &str = "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; \
$b=[System.Windows.Forms.Screen]::PrimaryScreen.Bounds; \
$bmp=New-Object System.Drawing.Bitmap $b.Width,$b.Height; \
$g=[System.Drawing.Graphics]::FromImage($bmp); \
$g.CopyFromScreen($b.Location,[System.Drawing.Point]::Empty,$b.Size); \
$bmp.Save('{output}',[System.Drawing.Imaging.ImageFormat]::Png)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    MacOs,
    Windows,
    Linux,
    Other,
}

impl HostOs {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => HostOs::MacOs,
            "windows" => HostOs::Windows,
            "linux" => HostOs::Linux,
            _ => HostOs::Other,
        }
    }
}

/// What the capture backend needs to know about the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    pub os: HostOs,
    pub ci: bool,
    pub has_display: bool,
    pub wayland: bool,
    pub path: Option<OsString>,
}

/// Inspects environment variables for CI markers and a desktop session.
pub fn detect_host<F>(os: HostOs, lookup: F) -> HostEnvironment
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let ci = non_empty("CI").is_some_and(|v| {
        let v = v.trim().to_ascii_lowercase();
        v != "0" && v != "false"
    });
    let wayland = non_empty("WAYLAND_DISPLAY").is_some()
        || non_empty("XDG_SESSION_TYPE").is_some_and(|v| v.eq_ignore_ascii_case("wayland"));
    let has_display = match os {
        HostOs::Linux | HostOs::Other => non_empty("DISPLAY").is_some() || wayland,
        HostOs::MacOs | HostOs::Windows => true,
    };

    HostEnvironment {
        os,
        ci,
        has_display,
        wayland,
        path: lookup("PATH").map(OsString::from),
    }
}

/// Default capture argv for a host.
pub fn default_command(host: &HostEnvironment) -> Vec<String> {
    let argv: &[&str] = match host.os {
        HostOs::MacOs => &["screencapture", "-x", "-t", "png", OUTPUT_PLACEHOLDER],
        HostOs::Windows => &[
            "powershell",
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            WINDOWS_CAPTURE_SCRIPT,
        ],
        HostOs::Linux | HostOs::Other if host.wayland => &["grim", OUTPUT_PLACEHOLDER],
        HostOs::Linux | HostOs::Other => &["import", "-window", "root", OUTPUT_PLACEHOLDER],
    };
    argv.iter().map(|s| (*s).to_string()).collect()
}

/// Screen capture by running an external tool.
#[derive(Debug, Clone)]
pub struct CommandScreenCapture {
    argv: Vec<String>,
    host: HostEnvironment,
}

impl CommandScreenCapture {
    /// Uses `argv` verbatim. An `{output}` placeholder is appended when the
    /// template has none.
    pub fn new(mut argv: Vec<String>, host: HostEnvironment) -> Self {
        if !argv.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER)) {
            argv.push(OUTPUT_PLACEHOLDER.to_string());
        }
        Self { argv, host }
    }

    /// Builds a capture for the current process environment. `template` is a
    /// whitespace-separated argv that overrides the platform default.
    pub fn from_env(template: Option<&str>) -> Self {
        let host = detect_host(HostOs::current(), |key| std::env::var(key).ok());
        let argv = template
            .map(|t| t.split_whitespace().map(String::from).collect::<Vec<_>>())
            .filter(|argv| !argv.is_empty())
            .unwrap_or_else(|| default_command(&host));
        Self::new(argv, host)
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }
}

#[async_trait]
impl ScreenCapture for CommandScreenCapture {
    fn check_available(&self) -> Result<(), SamplerUnavailable> {
        if self.host.ci {
            return Err(SamplerUnavailable::ContinuousIntegration);
        }
        if !self.host.has_display {
            return Err(SamplerUnavailable::NoDesktop);
        }
        let program = self.program();
        if program == OUTPUT_PLACEHOLDER || find_program(program, self.host.path.as_ref()).is_none() {
            return Err(SamplerUnavailable::MissingTool(program.to_string()));
        }
        Ok(())
    }

    async fn capture(&self) -> Result<CapturedImage, CaptureError> {
        let staging = tempfile::Builder::new()
            .prefix("unity-runner-capture-")
            .suffix(".png")
            .tempfile()?
            .into_temp_path();
        let output = staging.to_string_lossy().into_owned();

        let args: Vec<String> = self
            .argv
            .iter()
            .skip(1)
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect();
        debug!(program = self.program(), args = ?args, "Running capture command");

        let result = Command::new(self.program())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(CaptureError::Command(format!(
                "{} exited with {}: {}",
                self.program(),
                result.status,
                stderr.trim()
            )));
        }

        let bytes = tokio::fs::read(&staging).await?;
        if bytes.is_empty() {
            return Err(CaptureError::Empty);
        }
        Ok(CapturedImage::png(bytes))
    }
}

/// Resolves `program` the way a shell would: paths are checked directly,
/// bare names are searched on `PATH`.
fn find_program(program: &str, path: Option<&OsString>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = path?;
    std::env::split_paths(path).find_map(|dir| {
        let full = dir.join(program);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{program}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
