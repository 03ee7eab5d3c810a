//! Operators for the command line.
//!
//! [`TerminalOperator`] asks a person line by line. [`ScriptedOperator`]
//! replays a JSON box script so whole runs can be reproduced unattended.

use std::io::{BufRead, Write};

use fishnet_pipeline::review::{BoxRequest, ContextSelection, SelectionPurpose};
use fishnet_pipeline::{BoundingBox, CellPart, Operator, ReviewCommand, Verdict};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Parse one line of box-drawing input.
///
/// `x0 y0 x1 y1` adds a box (corners in any order); `undo`, `reset`,
/// `done`, and `quit` map to the other commands. A blank line is `done`.
#[must_use]
pub fn parse_command(line: &str) -> Option<ReviewCommand> {
    let line = line.trim();
    match line {
        "" | "done" | "d" => return Some(ReviewCommand::Finish),
        "undo" | "u" => return Some(ReviewCommand::RemoveLastBox),
        "reset" | "r" => return Some(ReviewCommand::Reset),
        "quit" | "q" => return Some(ReviewCommand::Quit),
        _ => {}
    }
    let coords: Vec<u32> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    match coords.as_slice() {
        &[x0, y0, x1, y1] => Some(ReviewCommand::AddBox(BoundingBox::from_corners(
            (x0, y0),
            (x1, y1),
        ))),
        _ => None,
    }
}

/// Indices of the comma-separated `answer` labels within `labels`.
///
/// A blank answer selects everything; unknown labels are skipped.
fn pick(answer: &str, labels: &[String]) -> Vec<usize> {
    let answer = answer.trim();
    if answer.is_empty() {
        return (0..labels.len()).collect();
    }
    answer
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|wanted| {
            let found = labels.iter().position(|l| l == wanted);
            if found.is_none() {
                warn!(label = wanted, "unknown label ignored");
            }
            found
        })
        .collect()
}

/// Interactive operator over any line reader and prompt writer.
///
/// End of input quits drawing, abandons review, and declines
/// substitutes.
#[derive(Debug)]
pub struct TerminalOperator<R, W> {
    input: R,
    prompt: W,
}

impl<R: BufRead, W: Write> TerminalOperator<R, W> {
    /// Read answers from `input`, write prompts to `prompt`.
    pub const fn new(input: R, prompt: W) -> Self {
        Self { input, prompt }
    }

    /// Prompt and read one line; `None` at end of input.
    fn ask(&mut self, question: &str) -> Option<String> {
        // prompt failures are not fatal; the answer still matters
        let _ = write!(self.prompt, "{question} ");
        let _ = self.prompt.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl<R: BufRead, W: Write> Operator for TerminalOperator<R, W> {
    fn draw_boxes(&mut self, request: &BoxRequest<'_>) -> Vec<ReviewCommand> {
        let preview = request
            .preview
            .map(|p| format!(", preview has {} regions", fishnet_pipeline::labels::unique_ids(p).len()))
            .unwrap_or_default();
        let question = format!(
            "{} boxes on {}x{} canvas ({} drawn{preview}). `x0 y0 x1 y1`, undo, reset, done, quit:",
            request.part,
            request.canvas.width(),
            request.canvas.height(),
            request.boxes.len(),
        );
        loop {
            let Some(line) = self.ask(&question) else {
                return vec![ReviewCommand::Quit];
            };
            match parse_command(&line) {
                Some(command) => return vec![command],
                None => {
                    let _ = writeln!(self.prompt, "could not read {line:?}");
                }
            }
        }
    }

    fn verdict(&mut self, title: &str, summary: &str) -> Verdict {
        let question = format!("{title}: {summary}. [a]ccept, [r]etry, or abandon [x]?");
        loop {
            match self.ask(&question).as_deref() {
                None | Some("x" | "abandon") => return Verdict::Abandon,
                Some("a" | "accept" | "") => return Verdict::Accept,
                Some("r" | "retry") => return Verdict::Retry,
                Some(_) => {}
            }
        }
    }

    fn has_substitute(&mut self, requirement: &str) -> bool {
        let question = format!("`{requirement}` is missing. Load it from a previous run? [y/N]");
        matches!(self.ask(&question).as_deref(), Some("y" | "yes"))
    }

    fn select_contexts(
        &mut self,
        purpose: SelectionPurpose,
        z_labels: &[String],
        channel_labels: &[String],
    ) -> ContextSelection {
        let what = match purpose {
            SelectionPurpose::Canvas => "canvas",
            SelectionPurpose::Measurement => "measurement",
        };
        let z = self
            .ask(&format!("Z levels for {what} [{}] (blank for all):", z_labels.join(",")))
            .unwrap_or_default();
        let c = self
            .ask(&format!("Channels for {what} [{}] (blank for all):", channel_labels.join(",")))
            .unwrap_or_default();
        ContextSelection {
            z_levels: pick(&z, z_labels),
            channels: pick(&c, channel_labels),
        }
    }
}

/// A recorded session, loaded from `--boxes`.
///
/// Boxes are `[x0, y0, x1, y1]` in canvas coordinates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxScript {
    /// Nucleus boxes.
    pub nucleus: Vec<[u32; 4]>,
    /// Cytoplasm boxes.
    pub cytoplasm: Vec<[u32; 4]>,
    /// Channels to project for the canvas; all when empty.
    pub canvas_channels: Vec<String>,
    /// Requirements to load from a previous run when missing.
    pub substitutes: Vec<String>,
}

/// Replays a [`BoxScript`] and accepts every result.
#[derive(Debug)]
pub struct ScriptedOperator {
    script: BoxScript,
}

impl ScriptedOperator {
    /// Replay `script`.
    #[must_use]
    pub const fn new(script: BoxScript) -> Self {
        Self { script }
    }
}

impl Operator for ScriptedOperator {
    fn draw_boxes(&mut self, request: &BoxRequest<'_>) -> Vec<ReviewCommand> {
        // the script is complete once drawn, so later rounds just finish
        if !request.boxes.is_empty() {
            return vec![ReviewCommand::Finish];
        }
        let boxes = match request.part {
            CellPart::Nucleus => &self.script.nucleus,
            CellPart::Cytoplasm => &self.script.cytoplasm,
        };
        boxes
            .iter()
            .map(|&[x0, y0, x1, y1]| ReviewCommand::AddBox(BoundingBox::from_corners((x0, y0), (x1, y1))))
            .chain(std::iter::once(ReviewCommand::Finish))
            .collect()
    }

    fn verdict(&mut self, _title: &str, _summary: &str) -> Verdict {
        Verdict::Accept
    }

    fn has_substitute(&mut self, requirement: &str) -> bool {
        self.script.substitutes.iter().any(|s| s == requirement)
    }

    fn select_contexts(
        &mut self,
        purpose: SelectionPurpose,
        z_labels: &[String],
        channel_labels: &[String],
    ) -> ContextSelection {
        let mut selection = ContextSelection::all(z_labels.len(), channel_labels.len());
        if purpose == SelectionPurpose::Canvas && !self.script.canvas_channels.is_empty() {
            selection.channels = pick(&self.script.canvas_channels.join(","), channel_labels);
        }
        selection
    }
}
