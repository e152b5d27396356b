//! Interactive front end: a URL field, a file-upload field and a compare
//! trigger, driven by line commands.
//!
//! ```text
//! url <URL>      set the first image
//! file <PATH>    upload the second image
//! compare        run a comparison (enabled once models are loaded)
//! quit
//! ```

use crate::input::{InputSource, InteractiveInputs};
use crate::pipeline::{ModelLoader, UiContext};
use crate::presenter::Status;
use std::path::Path;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Url(&'a str),
    File(&'a str),
    Compare,
    Quit,
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, arg) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, a)| (w, a.trim()));

        match (word.to_ascii_lowercase().as_str(), arg) {
            ("url", "") | ("file", "") => Err(format!("{word} needs an argument")),
            ("url", arg) => Ok(Some(Command::Url(arg))),
            ("file", arg) => Ok(Some(Command::File(arg))),
            ("compare", _) => Ok(Some(Command::Compare)),
            ("quit" | "exit", _) => Ok(Some(Command::Quit)),
            _ => Err(format!("unknown command: {word}")),
        }
    }
}

/// Serve commands from `input` until it ends or `quit`.
///
/// Models load in the background from the start; `compare` is refused until
/// they are ready, and stays refused if loading failed.
pub async fn run<L, R>(ui: &mut UiContext, loader: &L, input: R, base_dir: &Path) -> std::io::Result<()>
where
    L: ModelLoader,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut inputs = InteractiveInputs::default();
    let mut extractor: Option<L::Extractor> = None;
    let mut loading = true;

    ui.begin_loading();
    let load = loader.load();
    tokio::pin!(load);

    loop {
        tokio::select! {
            biased;
            loaded = &mut load, if loading => {
                loading = false;
                extractor = ui.finish_loading(loaded);
                if extractor.is_some() {
                    ui.show(Status::Idle);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(Command::Url(raw))) => match inputs.set_url(raw, base_dir) {
                        Ok(image) => ui.set_image(0, image.clone()),
                        Err(e) => notice(&e.to_string()),
                    },
                    Ok(Some(Command::File(path))) => {
                        let image = inputs.upload(Path::new(path)).await.clone();
                        ui.set_image(1, image);
                    }
                    Ok(Some(Command::Compare)) => match &extractor {
                        Some(x) if ui.compare_enabled() => {
                            if let Err(e) = inputs.resolve() {
                                ui.reject(e);
                            } else {
                                ui.compare_attempt(x).await;
                            }
                        }
                        _ => notice("compare is disabled until the models are loaded"),
                    },
                    Err(msg) => notice(&msg),
                }
            }
        }
    }

    Ok(())
}

fn notice(msg: &str) {
    tracing::warn!("{msg}");
    eprintln!("{msg}");
}
