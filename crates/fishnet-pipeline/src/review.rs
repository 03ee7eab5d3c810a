//! The operator seam.
//!
//! Everything a human decides reaches the pipeline through the
//! [`Operator`] trait. Box drawing is a command queue: the operator
//! returns [`ReviewCommand`]s, the owning node applies them to a
//! [`BoxSession`] and asks again until the session is closed.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::types::{BoundingBox, CellPart, LabelMask};

/// Outcome of reviewing a node's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Reinitialize and process again.
    Retry,
    /// Keep the output.
    Accept,
    /// Discard the output and move on.
    Abandon,
}

/// One operator intent while drawing boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCommand {
    /// Append a box.
    AddBox(BoundingBox),
    /// Undo the most recent box.
    RemoveLastBox,
    /// Drop every box.
    Reset,
    /// Boxes are complete.
    Finish,
    /// Abort the node.
    Quit,
}

/// Where a [`BoxSession`] stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Still accepting commands.
    Drawing,
    /// Closed by [`ReviewCommand::Finish`].
    Finished,
    /// Closed by [`ReviewCommand::Quit`].
    Quit,
}

/// Boxes collected for one cell part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxSession {
    boxes: Vec<BoundingBox>,
    state: SessionState,
}

impl Default for BoxSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxSession {
    /// An empty, open session.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            boxes: Vec::new(),
            state: SessionState::Drawing,
        }
    }

    /// Append a box.
    pub fn push_box(&mut self, bbox: BoundingBox) {
        self.boxes.push(bbox);
    }

    /// Remove and return the most recent box.
    pub fn pop_last_box(&mut self) -> Option<BoundingBox> {
        self.boxes.pop()
    }

    /// Drop all boxes and reopen the session.
    pub fn reset(&mut self) {
        self.boxes.clear();
        self.state = SessionState::Drawing;
    }

    /// Boxes in drawing order.
    #[must_use]
    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    /// Boxes whose area is above `min_area`.
    #[must_use]
    pub fn boxes_above(&self, min_area: u64) -> Vec<BoundingBox> {
        self.boxes
            .iter()
            .copied()
            .filter(|b| b.area() > min_area)
            .collect()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Apply one command. Commands after the session closes are ignored.
    pub fn apply(&mut self, command: ReviewCommand) -> SessionState {
        if self.state != SessionState::Drawing {
            return self.state;
        }
        match command {
            ReviewCommand::AddBox(bbox) => self.push_box(bbox),
            ReviewCommand::RemoveLastBox => {
                self.pop_last_box();
            }
            ReviewCommand::Reset => self.reset(),
            ReviewCommand::Finish => self.state = SessionState::Finished,
            ReviewCommand::Quit => self.state = SessionState::Quit,
        }
        self.state
    }

    /// Apply a batch.
    ///
    /// An empty batch finishes the session: an operator with nothing
    /// left to say is done.
    pub fn apply_all(&mut self, commands: impl IntoIterator<Item = ReviewCommand>) -> SessionState {
        let mut any = false;
        for command in commands {
            any = true;
            self.apply(command);
        }
        if !any {
            self.apply(ReviewCommand::Finish);
        }
        self.state
    }
}

/// What the operator sees when asked for boxes.
#[derive(Debug, Clone, Copy)]
pub struct BoxRequest<'a> {
    /// Part being drawn.
    pub part: CellPart,
    /// Image the boxes refer to.
    pub canvas: &'a GrayImage,
    /// Boxes drawn so far.
    pub boxes: &'a [BoundingBox],
    /// Segmentation of the current boxes, when there are any.
    pub preview: Option<&'a LabelMask>,
}

/// Why the operator is choosing planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPurpose {
    /// The projection shown while drawing boxes.
    Canvas,
    /// The planes that get measured.
    Measurement,
}

/// Indices of the chosen z levels and channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSelection {
    /// Indices into the stack's z labels.
    pub z_levels: Vec<usize>,
    /// Indices into the stack's channel labels.
    pub channels: Vec<usize>,
}

impl ContextSelection {
    /// Every z level and channel.
    #[must_use]
    pub fn all(z_count: usize, channel_count: usize) -> Self {
        Self {
            z_levels: (0..z_count).collect(),
            channels: (0..channel_count).collect(),
        }
    }
}

/// The human in the loop.
pub trait Operator {
    /// Commands for the next round of box drawing.
    fn draw_boxes(&mut self, request: &BoxRequest<'_>) -> Vec<ReviewCommand>;

    /// Judge a retry-enabled node's output.
    fn verdict(&mut self, title: &str, summary: &str) -> Verdict;

    /// Whether a stored artifact may stand in for a missing requirement.
    fn has_substitute(&mut self, requirement: &str) -> bool;

    /// Choose planes from the stack.
    fn select_contexts(
        &mut self,
        purpose: SelectionPurpose,
        z_labels: &[String],
        channel_labels: &[String],
    ) -> ContextSelection;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(side: u32) -> BoundingBox {
        BoundingBox::new(0, 0, side, side)
    }

    #[test]
    fn commands_edit_the_box_list() {
        let mut session = BoxSession::new();
        session.apply(ReviewCommand::AddBox(bbox(5)));
        session.apply(ReviewCommand::AddBox(bbox(6)));
        session.apply(ReviewCommand::RemoveLastBox);
        assert_eq!(session.boxes(), &[bbox(5)]);
        session.apply(ReviewCommand::Reset);
        assert!(session.boxes().is_empty());
        assert_eq!(session.state(), SessionState::Drawing);
    }

    #[test]
    fn pop_on_empty_session_is_harmless() {
        let mut session = BoxSession::new();
        assert_eq!(session.pop_last_box(), None);
        assert_eq!(session.apply(ReviewCommand::RemoveLastBox), SessionState::Drawing);
    }

    #[test]
    fn closed_session_ignores_commands() {
        let mut session = BoxSession::new();
        let state = session.apply_all([
            ReviewCommand::AddBox(bbox(3)),
            ReviewCommand::Quit,
            ReviewCommand::AddBox(bbox(4)),
        ]);
        assert_eq!(state, SessionState::Quit);
        assert_eq!(session.boxes(), &[bbox(3)]);
    }

    #[test]
    fn empty_batch_finishes() {
        let mut session = BoxSession::new();
        assert_eq!(session.apply_all([]), SessionState::Finished);
    }

    #[test]
    fn tiny_boxes_are_filtered() {
        let mut session = BoxSession::new();
        session.push_box(bbox(10));
        session.push_box(bbox(11));
        assert_eq!(session.boxes_above(100), vec![bbox(11)]);
    }

    #[test]
    fn select_all_covers_the_stack() {
        let selection = ContextSelection::all(2, 3);
        assert_eq!(selection.z_levels, vec![0, 1]);
        assert_eq!(selection.channels, vec![0, 1, 2]);
    }
}
