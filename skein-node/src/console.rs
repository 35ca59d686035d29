//! Line-oriented console standing in for an editor widget.
//!
//! ```text
//! insert 0 5 , world\n     type ", world" and a newline at line 0, column 5
//! delete 0 0 1 0           remove line 0 including its newline
//! connect ws://host:9000   join another site
//! text | peers | help | quit
//! ```

use skein_crdt::{LineCol, SiteId};
use skein_mesh::{Editor, PeerId, PeerList};
use thiserror::Error;

pub const HELP: &str = "\
commands:
  insert LINE COL TEXT        insert TEXT (\\n for newline, \\\\ for backslash)
  delete LINE COL LINE COL    delete the range [start, end)
  connect PEER                dial another site, e.g. ws://127.0.0.1:9001
  text                        print the document
  peers                       print known members
  quit";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command {0:?}, try help")]
    UnknownCommand(String),
    #[error("Missing {0}")]
    MissingArgument(&'static str),
    #[error("{0:?} is not a line or column number")]
    BadNumber(String),
    #[error("Insert needs some text")]
    EmptyInsert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Insert { at: LineCol, text: String },
    Delete { start: LineCol, end: LineCol },
    Connect(String),
    Text,
    Peers,
    Help,
    Quit,
}

/// Parses one console line. Blank lines parse to `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim_start();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    let command = match word.trim_end() {
        "" => return Ok(None),
        "insert" | "i" => {
            let mut parts = rest.trim_start().splitn(3, ' ');
            let at = LineCol::new(number(parts.next())?, number(parts.next())?);
            let text = unescape(parts.next().unwrap_or_default());
            if text.is_empty() {
                return Err(ConsoleError::EmptyInsert);
            }
            ConsoleCommand::Insert { at, text }
        }
        "delete" | "d" => {
            let mut parts = rest.split_whitespace();
            let start = LineCol::new(number(parts.next())?, number(parts.next())?);
            let end = LineCol::new(number(parts.next())?, number(parts.next())?);
            ConsoleCommand::Delete { start, end }
        }
        "connect" | "c" => match rest.trim() {
            "" => return Err(ConsoleError::MissingArgument("peer")),
            peer => ConsoleCommand::Connect(peer.to_string()),
        },
        "text" | "t" => ConsoleCommand::Text,
        "peers" | "p" => ConsoleCommand::Peers,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn number(part: Option<&str>) -> Result<usize, ConsoleError> {
    let part = part
        .filter(|part| !part.trim().is_empty())
        .ok_or(ConsoleError::MissingArgument("line or column"))?;
    part.trim()
        .parse()
        .map_err(|_| ConsoleError::BadNumber(part.to_string()))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Prints remote activity as it arrives.
#[derive(Debug, Default)]
pub struct ConsoleView;

impl Editor for ConsoleView {
    fn insert_text(&mut self, value: char, from: LineCol, _to: LineCol, origin: SiteId) {
        println!("<< {origin} inserted {value:?} at {}:{}", from.line, from.ch);
    }

    fn delete_text(&mut self, value: char, from: LineCol, _to: LineCol, origin: SiteId) {
        println!("<< {origin} deleted {value:?} at {}:{}", from.line, from.ch);
    }

    fn replace_text(&mut self, text: &str) {
        println!("<< document synced ({} chars)", text.chars().count());
    }

    fn remove_cursor(&mut self, _site_id: SiteId) {}
}

impl PeerList for ConsoleView {
    fn add_peer(&mut self, site_id: SiteId, peer_id: &PeerId) {
        println!("<< {peer_id} joined ({site_id})");
    }

    fn remove_peer(&mut self, peer_id: &PeerId) {
        println!("<< {peer_id} left");
    }
}
