//! Status display: the state machine of the result area and its renderers.

use serde::Serialize;
use std::io::Write;

/// Why an attempt ended in the error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Failure {
    /// `p1` or `p2` absent from the query.
    MissingInput,
    /// An image field left empty outside the query front end.
    MissingImage,
    ModelLoad,
    NoFace,
    ImageLoad,
    Processing,
}

/// State of the result area.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Idle,
    LoadingModels,
    Analyzing,
    Error(Failure),
    /// Same person, with the measured distance.
    Success(f32),
    /// Different people, with the measured distance.
    Mismatch(f32),
}

impl Status {
    /// Human-readable text shown to the user.
    pub fn message(&self) -> String {
        match self {
            Status::Idle => "Listo para comparar.".to_string(),
            Status::LoadingModels => "Cargando modelos... ⏳".to_string(),
            Status::Analyzing => "Analizando rostros... 🤔".to_string(),
            Status::Error(Failure::MissingInput) => {
                "Error: Faltan las URLs de las imágenes (p1 y p2).".to_string()
            }
            Status::Error(Failure::MissingImage) => "Error: Falta una de las dos imágenes.".to_string(),
            Status::Error(Failure::ModelLoad) => "Error al cargar los modelos de IA.".to_string(),
            Status::Error(Failure::NoFace) => {
                "No se pudo detectar un rostro en una o ambas imágenes.".to_string()
            }
            Status::Error(Failure::ImageLoad | Failure::Processing) => {
                "Error al procesar las imágenes.".to_string()
            }
            Status::Success(distance) => {
                format!("✅ ¡Son la misma persona! (Distancia: {distance:.4})")
            }
            Status::Mismatch(distance) => {
                format!("❌ No son la misma persona. (Distancia: {distance:.4})")
            }
        }
    }

    /// Style tag of the result area: `success`, `error`, or none while busy.
    pub fn class(&self) -> Option<&'static str> {
        match self {
            Status::Success(_) => Some("success"),
            Status::Error(_) | Status::Mismatch(_) => Some("error"),
            Status::Idle | Status::LoadingModels | Status::Analyzing => None,
        }
    }

    /// Whether this status ends the current comparison attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Error(_) | Status::Success(_) | Status::Mismatch(_))
    }

    fn state(&self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::LoadingModels => "loading_models",
            Status::Analyzing => "analyzing",
            Status::Error(_) => "error",
            Status::Success(_) => "success",
            Status::Mismatch(_) => "mismatch",
        }
    }

    fn distance(&self) -> Option<f32> {
        match self {
            Status::Success(d) | Status::Mismatch(d) => Some(*d),
            _ => None,
        }
    }
}

/// Receives every status transition of the result area.
pub trait StatusSink {
    fn show(&mut self, status: &Status);
}

/// Prints one line of text per transition.
pub struct TerminalPresenter<W> {
    out: W,
}

impl<W: Write> TerminalPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> StatusSink for TerminalPresenter<W> {
    fn show(&mut self, status: &Status) {
        if let Err(e) = writeln!(self.out, "{}", status.message()).and_then(|_| self.out.flush()) {
            tracing::warn!(error = %e, "failed to write status");
        }
    }
}

#[derive(Serialize)]
struct StatusLine<'a> {
    state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f32>,
    message: String,
}

/// Emits one JSON object per transition, for scripting.
pub struct JsonPresenter<W> {
    out: W,
}

impl<W: Write> JsonPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> StatusSink for JsonPresenter<W> {
    fn show(&mut self, status: &Status) {
        let line = StatusLine {
            state: status.state(),
            class: status.class(),
            failure: match status {
                Status::Error(f) => Some(*f),
                _ => None,
            },
            distance: status.distance(),
            message: status.message(),
        };
        let written = serde_json::to_writer(&mut self.out, &line)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(self.out))
            .and_then(|_| self.out.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_message_formats_four_decimals() {
        let msg = Status::Success(0.42).message();
        assert!(msg.contains("Son la misma persona"), "{msg}");
        assert!(msg.contains("0.4200"), "{msg}");
    }

    #[test]
    fn test_mismatch_message() {
        let msg = Status::Mismatch(0.75).message();
        assert!(msg.contains("No son la misma persona"), "{msg}");
        assert!(msg.contains("0.7500"), "{msg}");
    }

    #[test]
    fn test_classes() {
        assert_eq!(Status::Success(0.1).class(), Some("success"));
        assert_eq!(Status::Mismatch(0.9).class(), Some("error"));
        assert_eq!(Status::Error(Failure::NoFace).class(), Some("error"));
        assert_eq!(Status::Analyzing.class(), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(Status::Error(Failure::ModelLoad).is_terminal());
        assert!(Status::Success(0.2).is_terminal());
        assert!(!Status::LoadingModels.is_terminal());
        assert!(!Status::Idle.is_terminal());
    }

    #[test]
    fn test_missing_image_does_not_mention_query_params() {
        let msg = Status::Error(Failure::MissingImage).message();
        assert!(!msg.contains("p1"), "{msg}");
        assert_ne!(msg, Status::Error(Failure::MissingInput).message());
    }

    #[test]
    fn test_image_and_processing_failures_share_message() {
        assert_eq!(
            Status::Error(Failure::ImageLoad).message(),
            Status::Error(Failure::Processing).message()
        );
    }

    #[test]
    fn test_terminal_presenter_writes_lines() {
        let mut buf = Vec::new();
        {
            let mut p = TerminalPresenter::new(&mut buf);
            p.show(&Status::LoadingModels);
            p.show(&Status::Success(0.42));
        }
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "Cargando modelos... ⏳");
        assert!(lines[1].contains("0.4200"));
    }

    #[test]
    fn test_json_presenter_fields() {
        let mut buf = Vec::new();
        {
            let mut p = JsonPresenter::new(&mut buf);
            p.show(&Status::Mismatch(0.75));
            p.show(&Status::Error(Failure::NoFace));
        }
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines().map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap());

        let first = lines.next().unwrap();
        assert_eq!(first["state"], "mismatch");
        assert_eq!(first["class"], "error");
        assert!((first["distance"].as_f64().unwrap() - 0.75).abs() < 1e-6);

        let second = lines.next().unwrap();
        assert_eq!(second["failure"], "no_face");
        assert!(second.get("distance").is_none());
    }
}
