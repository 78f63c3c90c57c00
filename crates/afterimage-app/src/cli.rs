use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::media::types::LoopMode;

pub const USAGE: &str = "\
Usage: afterimage [options]

  --media <path>      add a media layer (image, GIF, or video with the `video` feature)
  --webcam [device]   add a webcam layer (device index or name)
  --effect <key>      append an effect to the most recently added layer
  --loop <mode>       loop mode for the most recent layer: none, loop, reverse, ping-pong
  --bpm <n>           tempo exposed to shaders
  --set <name|path>   load a saved set
  -h, --help          show this help
";

/// Layer-building steps, applied in command-line order.
#[derive(Debug, Clone, PartialEq)]
pub enum StartupAction {
    Media(PathBuf),
    Webcam(Option<String>),
    Effect(String),
    Loop(LoopMode),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOptions {
    pub actions: Vec<StartupAction>,
    pub bpm: Option<f32>,
    pub set: Option<String>,
    pub help: bool,
}

impl CliOptions {
    /// Parse arguments (without the program name).
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut opts = Self::default();
        let mut args = args.into_iter().peekable();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--media" => {
                    let path = args.next().context("--media needs a path")?;
                    opts.actions.push(StartupAction::Media(PathBuf::from(path)));
                }
                "--webcam" => {
                    // Optional device: only consume the next arg if it isn't a flag
                    let device = args.next_if(|a| !a.starts_with('-'));
                    opts.actions.push(StartupAction::Webcam(device));
                }
                "--effect" => {
                    let key = args.next().context("--effect needs an effect key")?;
                    opts.actions.push(StartupAction::Effect(key));
                }
                "--loop" => {
                    let raw = args.next().context("--loop needs a mode")?;
                    let Some(mode) = LoopMode::parse(&raw) else {
                        bail!("unknown loop mode '{raw}' (none, loop, reverse, ping-pong)");
                    };
                    opts.actions.push(StartupAction::Loop(mode));
                }
                "--bpm" => {
                    let raw = args.next().context("--bpm needs a number")?;
                    let bpm: f32 = raw.parse().with_context(|| format!("invalid --bpm '{raw}'"))?;
                    if !(bpm.is_finite() && bpm > 0.0) {
                        bail!("--bpm must be positive");
                    }
                    opts.bpm = Some(bpm);
                }
                "--set" => {
                    opts.set = Some(args.next().context("--set needs a name or path")?);
                }
                "-h" | "--help" => opts.help = true,
                other => bail!("unknown argument '{other}'"),
            }
        }
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn actions_keep_order() {
        let opts = parse(&[
            "--media", "a.gif", "--effect", "invert", "--loop", "ping-pong", "--webcam",
            "--effect", "trails",
        ])
        .unwrap();
        assert_eq!(
            opts.actions,
            vec![
                StartupAction::Media(PathBuf::from("a.gif")),
                StartupAction::Effect("invert".into()),
                StartupAction::Loop(LoopMode::PingPong),
                StartupAction::Webcam(None),
                StartupAction::Effect("trails".into()),
            ]
        );
    }

    #[test]
    fn webcam_takes_optional_device() {
        let opts = parse(&["--webcam", "1", "--bpm", "128"]).unwrap();
        assert_eq!(opts.actions, vec![StartupAction::Webcam(Some("1".into()))]);
        assert_eq!(opts.bpm, Some(128.0));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--loop", "sideways"]).is_err());
        assert!(parse(&["--bpm", "fast"]).is_err());
        assert!(parse(&["--bpm", "-4"]).is_err());
        assert!(parse(&["--media"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn empty_is_default() {
        assert_eq!(parse(&[]).unwrap(), CliOptions::default());
    }
}
