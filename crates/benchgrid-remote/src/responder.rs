//! Pattern-matched answers to interactive prompts.
//!
//! A responder watches a command's output stream and, every time a fresh
//! match of its pattern shows up, yields the response to write to the
//! command's stdin. A stream that never prompts is simply passed through.

use regex::Regex;

/// Bytes of unmatched output kept so a prompt split across reads still matches.
const MAX_TAIL: usize = 4096;

#[derive(Debug, Clone)]
pub struct Responder {
    pattern: Regex,
    response: String,
    pending: String,
}

impl Responder {
    pub fn new(pattern: &str, response: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            response: response.into(),
            pending: String::new(),
        })
    }

    /// Responder that types an ssh key passphrase followed by a newline.
    pub fn passphrase(secret: &str) -> Self {
        Self {
            pattern: Regex::new("passphrase").expect("static pattern"),
            response: format!("{secret}\n"),
            pending: String::new(),
        }
    }

    /// Feed the next chunk of output. Returns what to write to stdin, if
    /// the chunk completed one or more prompts.
    pub fn feed(&mut self, chunk: &str) -> Option<String> {
        self.pending.push_str(chunk);

        let mut hits = 0;
        let mut consumed = 0;
        for m in self.pattern.find_iter(&self.pending) {
            hits += 1;
            consumed = m.end();
        }

        if hits > 0 {
            self.pending.drain(..consumed);
        } else if self.pending.len() > MAX_TAIL {
            let mut cut = self.pending.len() - MAX_TAIL;
            while !self.pending.is_char_boundary(cut) {
                cut += 1;
            }
            self.pending.drain(..cut);
        }

        (hits > 0).then(|| self.response.repeat(hits))
    }
}
