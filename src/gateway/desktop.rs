//! Desktop background setters driven by platform command-line tools.
//!
//! | Backend | Displays | Set |
//! |---------|----------|-----|
//! | `macos` | `System Events` desktops | `osascript` per desktop |
//! | `gnome` | `*` | `gsettings set org.gnome.desktop.background` |
//! | `swww` | `swww query` | `swww img -o <output>` |
//! | `command` | configured list or `*` | user template with `{path}` and `{display}` |
//!
//! Every invocation is bounded by `[desktop] timeout_secs`; a tool that is
//! missing, exits non-zero or times out is reported as an `OSError`.

use super::{BackgroundSetter, DisplayId, GatewayError, GatewayResult, Resolution};
use crate::config::{DesktopConfig, SetterKind};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Background setter for the configured [`SetterKind`].
#[derive(Debug, Clone)]
pub struct CommandBackgroundSetter {
    config: DesktopConfig,
}

impl CommandBackgroundSetter {
    #[must_use]
    pub fn new(config: DesktopConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn kind(&self) -> SetterKind {
        self.config.setter
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.max(1))
    }

    /// Run a tool and return its trimmed stdout.
    async fn run(&self, program: &str, args: &[String]) -> GatewayResult<String> {
        let mut command = tokio::process::Command::new(program);
        command.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout(), command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::os(format!("{program} not found")));
            }
            Ok(Err(e)) => return Err(GatewayError::os(format!("{program} failed to start: {e}"))),
            Err(_) => {
                return Err(GatewayError::os(format!(
                    "{program} timed out after {}s",
                    self.timeout().as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::os(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    async fn osascript(&self, script: String) -> GatewayResult<String> {
        self.run("osascript", &["-e".to_owned(), script]).await
    }
}

#[async_trait]
impl BackgroundSetter for CommandBackgroundSetter {
    async fn displays(&self) -> GatewayResult<Vec<DisplayId>> {
        if !self.config.displays.is_empty() {
            return Ok(self
                .config
                .displays
                .iter()
                .map(|d| DisplayId(d.clone()))
                .collect());
        }

        match self.config.setter {
            SetterKind::MacOs => {
                let count = self
                    .osascript(r#"tell application "System Events" to count desktops"#.to_owned())
                    .await?;
                let count: usize = count.parse().map_err(|_| {
                    GatewayError::os(format!("unexpected desktop count: {count:?}"))
                })?;
                Ok((1..=count).map(|n| DisplayId(n.to_string())).collect())
            }
            SetterKind::Swww => {
                let out = self.run("swww", &["query".to_owned()]).await?;
                let displays: Vec<DisplayId> =
                    parse_swww_query(&out).into_iter().map(|(id, _)| id).collect();
                if displays.is_empty() {
                    return Err(GatewayError::os("swww reports no outputs"));
                }
                Ok(displays)
            }
            SetterKind::Gnome | SetterKind::Command => Ok(vec![DisplayId::all()]),
        }
    }

    async fn primary_resolution(&self) -> Option<Resolution> {
        let found = match self.config.setter {
            SetterKind::MacOs => self
                .osascript(
                    r#"tell application "Finder" to get bounds of window of desktop"#.to_owned(),
                )
                .await
                .ok()
                .and_then(|out| parse_bounds(&out)),
            SetterKind::Swww => self
                .run("swww", &["query".to_owned()])
                .await
                .ok()
                .and_then(|out| parse_swww_query(&out).into_iter().find_map(|(_, res)| res)),
            SetterKind::Gnome | SetterKind::Command => None,
        };
        if found.is_none() {
            tracing::debug!(setter = ?self.config.setter, "primary display size unavailable");
        }
        found
    }

    async fn set_background(&self, path: &Path, display: &DisplayId) -> GatewayResult<()> {
        let path_str = path.to_string_lossy().into_owned();
        match self.config.setter {
            SetterKind::MacOs => {
                let target = if display.as_str() == DisplayId::ALL {
                    "every desktop".to_owned()
                } else {
                    format!("desktop {}", display.as_str())
                };
                let script = format!(
                    r#"tell application "System Events" to set picture of {target} to POSIX file "{}""#,
                    applescript_escape(&path_str)
                );
                self.osascript(script).await?;
            }
            SetterKind::Gnome => {
                let uri = format!("file://{path_str}");
                for key in ["picture-uri", "picture-uri-dark"] {
                    self.run(
                        "gsettings",
                        &[
                            "set".to_owned(),
                            "org.gnome.desktop.background".to_owned(),
                            key.to_owned(),
                            uri.clone(),
                        ],
                    )
                    .await?;
                }
            }
            SetterKind::Swww => {
                let mut args = vec!["img".to_owned()];
                if display.as_str() != DisplayId::ALL {
                    args.push("-o".to_owned());
                    args.push(display.as_str().to_owned());
                }
                args.push(path_str);
                self.run("swww", &args).await?;
            }
            SetterKind::Command => {
                let argv = substitute(&self.config.command, &path_str, display.as_str());
                let Some((program, args)) = argv.split_first() else {
                    return Err(GatewayError::os("desktop.command is empty"));
                };
                self.run(program, args).await?;
            }
        }
        let target = display;
        tracing::debug!(display = %target, path = %path.display(), "background set");
        Ok(())
    }
}

/// Replace `{path}` and `{display}` in every argument.
fn substitute(template: &[String], path: &str, display: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{path}", path).replace("{display}", display))
        .collect()
}

fn applescript_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parse Finder desktop bounds (`0, 0, 2560, 1440`).
fn parse_bounds(out: &str) -> Option<Resolution> {
    let parts: Vec<i64> = out
        .split(',')
        .map(|p| p.trim().parse::<i64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let [left, top, right, bottom] = parts.as_slice() else {
        return None;
    };
    let res = Resolution::new(
        u32::try_from(right - left).ok()?,
        u32::try_from(bottom - top).ok()?,
    );
    (!res.is_empty()).then_some(res)
}

/// Parse `swww query` output into outputs and their sizes.
///
/// Lines look like `DP-1: 2560x1440, scale: 1, currently displaying: ...`,
/// newer releases prefix them with `: `.
fn parse_swww_query(out: &str) -> Vec<(DisplayId, Option<Resolution>)> {
    out.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(':').trim_start();
            let (name, rest) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let size = rest.trim().split(',').next().unwrap_or_default();
            let resolution = size.split_once('x').and_then(|(w, h)| {
                Some(Resolution::new(w.trim().parse().ok()?, h.trim().parse().ok()?))
            });
            Some((DisplayId(name.to_owned()), resolution))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::gateway::GatewayErrorKind;

    #[test]
    fn substitute_fills_placeholders() {
        let template = vec!["feh".to_owned(), "--bg-fill".to_owned(), "{path}".to_owned(), "--on={display}".to_owned()];
        assert_eq!(
            substitute(&template, "/w/a.png", "DP-1"),
            vec!["feh", "--bg-fill", "/w/a.png", "--on=DP-1"]
        );
    }

    #[test]
    fn swww_query_both_formats() {
        let out = "DP-1: 2560x1440, scale: 1, currently displaying: color: 000000\n\
                   : HDMI-A-1: 1920x1080, scale: 1, currently displaying: image: /w/x.png\n";
        let parsed = parse_swww_query(out);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0.as_str(), "DP-1");
        assert_eq!(parsed[0].1, Some(Resolution::new(2560, 1440)));
        assert_eq!(parsed[1].0.as_str(), "HDMI-A-1");
        assert_eq!(parsed[1].1, Some(Resolution::new(1920, 1080)));
    }

    #[test]
    fn bounds_parse() {
        assert_eq!(parse_bounds("0, 0, 2560, 1440"), Some(Resolution::new(2560, 1440)));
        assert_eq!(parse_bounds("0, 0, 0, 0"), None);
        assert_eq!(parse_bounds("garbage"), None);
    }

    #[test]
    fn applescript_quotes_are_escaped() {
        assert_eq!(applescript_escape(r#"/a "b"\c"#), r#"/a \"b\"\\c"#);
    }

    fn command_setter(command: Vec<String>) -> CommandBackgroundSetter {
        CommandBackgroundSetter::new(DesktopConfig {
            setter: SetterKind::Command,
            command,
            displays: Vec::new(),
            timeout_secs: 1,
        })
    }

    #[tokio::test]
    async fn configured_displays_win() {
        let setter = CommandBackgroundSetter::new(DesktopConfig {
            displays: vec!["DP-1".to_owned(), "DP-2".to_owned()],
            ..DesktopConfig::default()
        });
        let displays = setter.displays().await.unwrap();
        assert_eq!(displays, vec![DisplayId("DP-1".to_owned()), DisplayId("DP-2".to_owned())]);
    }

    #[tokio::test]
    async fn command_setter_reports_all_displays() {
        let setter = command_setter(vec!["true".to_owned()]);
        assert_eq!(setter.displays().await.unwrap(), vec![DisplayId::all()]);
        assert!(setter.primary_resolution().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_setter_runs_template() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("wall.png");
        std::fs::write(&src, b"png").unwrap();
        let dest = dir.path().join("applied.png");

        let setter = command_setter(vec![
            "cp".to_owned(),
            "{path}".to_owned(),
            dest.to_string_lossy().into_owned(),
        ]);
        setter.set_background(&src, &DisplayId::all()).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"png");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_os_error() {
        let setter = command_setter(vec!["false".to_owned()]);
        let err = setter
            .set_background(Path::new("/nope.png"), &DisplayId::all())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::OsError);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let setter = command_setter(vec!["sleep".to_owned(), "5".to_owned()]);
        let err = setter
            .set_background(Path::new("/nope.png"), &DisplayId::all())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::OsError);
        assert!(err.message.contains("timed out"));
    }

    #[tokio::test]
    async fn missing_program_is_os_error() {
        let setter = command_setter(vec!["taskpaper-no-such-tool".to_owned()]);
        let err = setter
            .set_background(Path::new("/nope.png"), &DisplayId::all())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::OsError);
    }

    #[tokio::test]
    async fn empty_command_is_os_error() {
        let setter = command_setter(Vec::new());
        let err = setter
            .set_background(Path::new("/nope.png"), &DisplayId::all())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::OsError);
    }
}
