//! Streaming reader over a MediaWiki XML export (`.xml` or `.xml.bz2`).
//!
//! Pages are cut out of the byte stream by their `<page>` tags and turned
//! into [`Article`]s; the rest of the export schema is ignored.

use crate::error::ExtractError;
use crate::job::Article;
use bzip2::read::BzDecoder;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

lazy_static! {
    static ref TITLE_PATTERN: Regex = Regex::new(r"<title>([^<]+)</title>").unwrap();
    static ref TEXT_PATTERN: Regex = Regex::new(r"(?s)<text[^>]*>(.+?)</text>").unwrap();
}

const CHUNK_SIZE: usize = 1024 * 1024;

/// Open `path`, decompressing on the fly when it ends in `.bz2`.
pub fn open_dump(path: &Path) -> Result<DumpReader<Box<dyn BufRead + Send>>, ExtractError> {
    let file = File::open(path).map_err(|source| ExtractError::Dump {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn BufRead + Send> = if path.to_string_lossy().ends_with(".bz2") {
        Box::new(BufReader::with_capacity(256 * 1024, BzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(256 * 1024, file))
    };
    Ok(DumpReader::new(reader))
}

pub struct DumpReader<R> {
    reader: R,
    buffer: String,
    chunk: Vec<u8>,
    // Trailing bytes of a UTF-8 sequence cut by the chunk boundary
    pending: Vec<u8>,
    ready: VecDeque<Article>,
    exhausted: bool,
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(reader: R) -> Self {
        DumpReader {
            reader,
            buffer: String::new(),
            chunk: vec![0u8; CHUNK_SIZE],
            pending: Vec::new(),
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Read one chunk and queue every complete page it finishes.
    fn fill(&mut self) -> io::Result<()> {
        let bytes_read = self.reader.read(&mut self.chunk)?;
        if bytes_read == 0 {
            self.exhausted = true;
            return Ok(());
        }
        self.pending.extend_from_slice(&self.chunk[..bytes_read]);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        self.buffer.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
        self.pending.drain(..valid);

        while let Some(start) = self.buffer.find("<page>") {
            let Some(end_offset) = self.buffer[start..].find("</page>") else {
                self.buffer.drain(..start);
                break;
            };
            let end = start + end_offset + "</page>".len();
            if let Some(article) = parse_page(&self.buffer[start..end]) {
                self.ready.push_back(article);
            }
            self.buffer.drain(..end);
        }

        // Keep a short tail in case "<page>" straddles two chunks
        if self.buffer.len() > 10 && !self.buffer.contains("<page>") {
            let mut cut = self.buffer.len() - 10;
            while !self.buffer.is_char_boundary(cut) {
                cut -= 1;
            }
            self.buffer.drain(..cut);
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for DumpReader<R> {
    type Item = io::Result<Article>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(article) = self.ready.pop_front() {
                return Some(Ok(article));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

/// Title and unescaped wikitext of one `<page>` block; `None` if either is missing.
pub fn parse_page(page_xml: &str) -> Option<Article> {
    let title = TITLE_PATTERN.captures(page_xml)?.get(1)?.as_str();
    let text = TEXT_PATTERN.captures(page_xml)?.get(1)?.as_str();
    Some(Article::new(unescape_xml(title), unescape_xml(text)))
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    // &amp; last so "&amp;lt;" stays "&lt;"
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
