//! A minimal, synchronous MPD line-protocol client.
//!
//! Only the subset of the [MPD protocol](https://mpd.readthedocs.io/en/latest/protocol.html)
//! `MusicIndex` needs (§6a of SPEC_FULL.md): the wire format itself mirrors
//! the teacher's own `src/mpd_protocol/response_format.rs` (same
//! `key: value` line shape, same `file:`-delimited record boundary), just
//! read from the client side of the connection instead of written from the
//! server side.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use indexmap::IndexMap;

pub struct MpdConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl MpdConnection {
    pub fn connect(host: &str, port: u16, password: Option<&str>) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .map_err(|e| eyre!("could not connect to mpd at {host}:{port}: {e}"))?;
        let writer = stream.try_clone()?;
        let mut conn = Self {
            reader: BufReader::new(stream),
            writer,
        };

        let greeting = conn.read_line()?;
        if !greeting.starts_with("OK MPD") {
            bail!("unexpected greeting from mpd: {greeting}");
        }

        if let Some(password) = password {
            conn.command(&format!("password {}", quote(password)))?;
        }

        Ok(conn)
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            bail!("mpd closed the connection");
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }

    /// Send one command line and collect its response lines up to (not
    /// including) the `OK`/`ACK` terminator. A non-`OK` terminator becomes
    /// an I/O-layer error — it's not part of the query language, so it's a
    /// `color_eyre::Report`, not a `QueryError`.
    pub fn command(&mut self, line: &str) -> Result<Vec<String>> {
        writeln!(self.writer, "{line}")?;
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == "OK" {
                return Ok(lines);
            }
            if let Some(ack) = line.strip_prefix("ACK ") {
                bail!("mpd error: {ack}");
            }
            lines.push(line);
        }
    }

    /// A response that's a single flat `key: value` dict (`stats`,
    /// `currentsong`, ...).
    pub fn command_pairs(&mut self, line: &str) -> Result<IndexMap<String, String>> {
        Ok(parse_pairs(&self.command(line)?))
    }

    /// A response that's a sequence of records, each beginning at a
    /// repetition of `boundary_key` (`file` for song listings, `playlist`
    /// for `listplaylists`, ...).
    pub fn command_records(
        &mut self,
        line: &str,
        boundary_key: &str,
    ) -> Result<Vec<IndexMap<String, String>>> {
        Ok(parse_records(&self.command(line)?, boundary_key))
    }
}

fn parse_pairs(lines: &[String]) -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    for line in lines {
        if let Some((key, value)) = split_pair(line) {
            map.insert(key, value);
        }
    }
    map
}

fn parse_records(lines: &[String], boundary_key: &str) -> Vec<IndexMap<String, String>> {
    let mut records = Vec::new();
    let mut current: IndexMap<String, String> = IndexMap::new();
    for line in lines {
        let Some((key, value)) = split_pair(line) else {
            continue;
        };
        if key == boundary_key && !current.is_empty() {
            records.push(std::mem::take(&mut current));
        }
        current.insert(key, value);
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

fn split_pair(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(": ")?;
    Some((key.to_string(), value.to_string()))
}

/// Quote and escape a value the way MPD's command grammar expects:
/// backslash and double-quote are backslash-escaped, the whole value is
/// wrapped in double quotes.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Build a `search`/`find`-style command: the verb followed by
/// alternating `TYPE VALUE` pairs, each quoted.
pub fn build_tag_command(verb: &str, fields: &[(&str, &str)]) -> String {
    let mut cmd = verb.to_string();
    for (field, value) in fields {
        cmd.push(' ');
        cmd.push_str(field);
        cmd.push(' ');
        cmd.push_str(&quote(value));
    }
    cmd
}
