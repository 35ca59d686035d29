//! Line-structured character store.
//!
//! The document is one position-ordered character sequence. Lines are a
//! view over it: every line except the last ends with a `'\n'` character and
//! no line is empty, except the single line of an empty document.
//!
//! ```text
//!  sequence   h  i  \n  y  o
//!  lines      [h, i, \n]  [y, o]
//! ```
//!
//! Remote operations locate their slot by binary search on the position
//! path, so the resulting structure depends only on path order and never on
//! arrival order.

use serde::{Deserialize, Serialize};

use crate::allocator::PositionAllocator;
use crate::character::Char;
use crate::error::CrdtError;
use crate::identifier::Position;
use crate::SiteId;

/// Line/column coordinate in the visible text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineCol {
    pub line: usize,
    pub ch: usize,
}

impl LineCol {
    pub fn new(line: usize, ch: usize) -> Self {
        Self { line, ch }
    }
}

/// The CRDT document: characters in lines, sorted by position path.
#[derive(Debug, Clone)]
pub struct CharStore {
    lines: Vec<Vec<Char>>,
    allocator: PositionAllocator,
}

impl CharStore {
    pub fn new(allocator: PositionAllocator) -> Self {
        Self {
            lines: vec![Vec::new()],
            allocator,
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.allocator.site_id()
    }

    pub fn lines(&self) -> &[Vec<Char>] {
        &self.lines
    }

    /// All characters in document order.
    pub fn chars(&self) -> impl Iterator<Item = &Char> {
        self.lines.iter().flatten()
    }

    pub fn total_chars(&self) -> usize {
        self.lines.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_chars() == 0
    }

    pub fn to_text(&self) -> String {
        self.chars().map(|c| c.value).collect()
    }

    // ---------------------------------------------------------------
    // Local edits
    // ---------------------------------------------------------------

    /// Inserts `value` at the visible coordinate `at`.
    ///
    /// The position path is allocated between the neighbours of `at`; the
    /// caller supplies the counter it stamped for this edit. Nothing changes
    /// if `at` is outside the document.
    pub fn handle_local_insert(
        &mut self,
        value: char,
        at: LineCol,
        counter: u64,
    ) -> Result<Char, CrdtError> {
        self.check_insertable(at)?;

        let before = self.position_before(at);
        let after = self.position_after(at);
        let position = self.allocator.allocate_between(&before, &after);
        let ch = Char::new(value, counter, self.site_id(), position);

        self.insert_at(at, ch.clone());
        Ok(ch)
    }

    /// Removes every character between `start` (inclusive) and `end`
    /// (exclusive) and returns them in document order.
    pub fn handle_local_delete(
        &mut self,
        start: LineCol,
        end: LineCol,
    ) -> Result<Vec<Char>, CrdtError> {
        if end < start {
            return Err(CrdtError::InvalidRange { start, end });
        }
        let start_len = self
            .lines
            .get(start.line)
            .map(Vec::len)
            .ok_or_else(|| CrdtError::out_of_bounds(start))?;
        if start.ch > start_len {
            return Err(CrdtError::out_of_bounds(start));
        }
        if start == end {
            return Ok(Vec::new());
        }

        let removed = if start.line == end.line {
            let stop = end.ch.min(start_len);
            self.lines[start.line].drain(start.ch..stop).collect()
        } else {
            let last = end.line.min(self.lines.len() - 1);
            let mut removed: Vec<Char> = self.lines[start.line].drain(start.ch..).collect();
            let following: Vec<Vec<Char>> = self.lines.drain(start.line + 1..=last).collect();
            let mut tail = Vec::new();

            for (offset, mut line) in following.into_iter().enumerate() {
                if start.line + 1 + offset == end.line {
                    let stop = end.ch.min(line.len());
                    removed.extend(line.drain(..stop));
                    tail = line;
                } else {
                    removed.extend(line);
                }
            }
            self.lines[start.line].extend(tail);
            removed
        };

        self.rejoin(start.line);
        self.remove_empty_lines();
        Ok(removed)
    }

    // ---------------------------------------------------------------
    // Remote edits
    // ---------------------------------------------------------------

    /// Inserts a remote character at its sorted slot.
    ///
    /// Returns where it landed, or `None` if a character with the same
    /// position is already present.
    pub fn handle_remote_insert(&mut self, ch: Char) -> Option<LineCol> {
        match self.locate(&ch.position) {
            Ok(_) => None,
            Err(at) => {
                self.insert_at(at, ch);
                Some(at)
            }
        }
    }

    /// Removes the character whose position equals `ch.position`.
    ///
    /// Returns where it was, or `None` if it is already gone.
    pub fn handle_remote_delete(&mut self, ch: &Char) -> Option<LineCol> {
        let at = self.locate(&ch.position).ok()?;
        self.lines[at.line].remove(at.ch);
        self.rejoin(at.line);
        self.remove_empty_lines();
        Some(at)
    }

    /// Replaces the whole document with `chars`, which must already be in
    /// strictly increasing position order.
    pub fn replace_chars(&mut self, chars: impl IntoIterator<Item = Char>) {
        let mut lines = vec![Vec::new()];
        for ch in chars {
            let newline = ch.is_newline();
            if let Some(line) = lines.last_mut() {
                line.push(ch);
            }
            if newline {
                lines.push(Vec::new());
            }
        }
        self.lines = lines;
        self.remove_empty_lines();
    }

    /// Finds the character at `position`.
    ///
    /// `Ok` carries the coordinate of an exact match, `Err` the coordinate
    /// at which a character with that position would be inserted.
    pub fn locate(&self, position: &Position) -> Result<LineCol, LineCol> {
        if self.is_empty() {
            return Err(LineCol::default());
        }

        let line = self
            .lines
            .partition_point(|chars| chars.last().is_some_and(|c| c.position < *position));

        if line == self.lines.len() {
            let last = &self.lines[line - 1];
            return Err(if last.last().is_some_and(Char::is_newline) {
                LineCol::new(line, 0)
            } else {
                LineCol::new(line - 1, last.len())
            });
        }

        self.lines[line]
            .binary_search_by(|c| c.position.cmp(position))
            .map(|ch| LineCol::new(line, ch))
            .map_err(|ch| LineCol::new(line, ch))
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn check_insertable(&self, at: LineCol) -> Result<(), CrdtError> {
        match self.lines.get(at.line) {
            Some(line) => {
                let visible = line.len() - usize::from(line.last().is_some_and(Char::is_newline));
                if at.ch <= visible {
                    Ok(())
                } else {
                    Err(CrdtError::out_of_bounds(at))
                }
            }
            // The empty line after a trailing newline.
            None if at.line == self.lines.len()
                && at.ch == 0
                && self.lines[at.line - 1].last().is_some_and(Char::is_newline) =>
            {
                Ok(())
            }
            None => Err(CrdtError::out_of_bounds(at)),
        }
    }

    fn position_before(&self, at: LineCol) -> Position {
        let prev = if at.ch > 0 {
            self.lines.get(at.line).and_then(|line| line.get(at.ch - 1))
        } else if at.line > 0 {
            self.lines.get(at.line - 1).and_then(|line| line.last())
        } else {
            None
        };
        prev.map(|c| c.position.clone()).unwrap_or_default()
    }

    fn position_after(&self, at: LineCol) -> Position {
        let next = match self.lines.get(at.line) {
            Some(line) if at.ch < line.len() => line.get(at.ch),
            Some(_) => self.lines.get(at.line + 1).and_then(|line| line.first()),
            None => None,
        };
        next.map(|c| c.position.clone()).unwrap_or_default()
    }

    fn insert_at(&mut self, at: LineCol, ch: Char) {
        if at.line == self.lines.len() {
            self.lines.push(Vec::new());
        }
        let line = &mut self.lines[at.line];

        if ch.is_newline() {
            let after = line.split_off(at.ch);
            line.push(ch);
            if !after.is_empty() {
                self.lines.insert(at.line + 1, after);
            }
        } else {
            line.insert(at.ch, ch);
        }
    }

    /// Pulls the next line up into `line` if `line` lost its newline.
    fn rejoin(&mut self, line: usize) {
        let open = self
            .lines
            .get(line)
            .is_some_and(|chars| !chars.last().is_some_and(Char::is_newline));
        if open && line + 1 < self.lines.len() {
            let next = self.lines.remove(line + 1);
            self.lines[line].extend(next);
        }
    }

    fn remove_empty_lines(&mut self) {
        self.lines.retain(|line| !line.is_empty());
        if self.lines.is_empty() {
            self.lines.push(Vec::new());
        }
    }
}
