//! Operator interaction seam
//!
//! Every decision point in the core (clone or not, pull over local changes,
//! install, start the bot, editor answers) goes through a `Prompter`. The
//! terminal implementation lives in meshctl; `ScriptedPrompter` replays canned
//! answers.
//!
//! A prompt error means the operator went away (EOF) and the current step must
//! not change anything.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;

/// Kind of message shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Info,
    Success,
    Warning,
    Error,
}

pub trait Prompter {
    /// Free text; an empty answer takes the default
    fn input(&self, prompt: &str, default: Option<&str>) -> io::Result<String>;

    /// Yes/no question
    fn confirm(&self, prompt: &str, default: bool) -> io::Result<bool>;

    /// Pick one of `options`; returns its index
    fn choose(&self, prompt: &str, options: &[&str], default: usize) -> io::Result<usize>;

    fn notify(&self, notice: Notice, text: &str);
}

fn eof(prompt: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("no answer for '{}'", prompt),
    )
}

/// Replays a fixed list of answers and records every notice.
///
/// An empty answer selects the default. Running out of answers behaves like
/// EOF on a terminal.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<String>>,
    notices: RefCell<Vec<(Notice, String)>>,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: RefCell::new(answers.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    fn next(&self, prompt: &str) -> io::Result<String> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| eof(prompt))
    }

    pub fn notices(&self) -> Vec<(Notice, String)> {
        self.notices.borrow().clone()
    }

    /// Texts of notices of one kind
    pub fn notices_of(&self, kind: Notice) -> Vec<String> {
        self.notices
            .borrow()
            .iter()
            .filter(|(n, _)| *n == kind)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Prompts asked so far, in order
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.answers.borrow().len()
    }
}

impl Prompter for ScriptedPrompter {
    fn input(&self, prompt: &str, default: Option<&str>) -> io::Result<String> {
        let answer = self.next(prompt)?;
        if answer.trim().is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(answer.trim().to_string())
    }

    fn confirm(&self, prompt: &str, default: bool) -> io::Result<bool> {
        let answer = self.next(prompt)?;
        Ok(parse_yes_no(&answer).unwrap_or(default))
    }

    fn choose(&self, prompt: &str, options: &[&str], default: usize) -> io::Result<usize> {
        let answer = self.next(prompt)?;
        match answer.trim().parse::<usize>() {
            Ok(n) if n >= 1 && n <= options.len() => Ok(n - 1),
            _ => Ok(default),
        }
    }

    fn notify(&self, notice: Notice, text: &str) {
        self.notices.borrow_mut().push((notice, text.to_string()));
    }
}

/// Loose yes/no parsing shared by every confirmation
pub fn parse_yes_no(answer: &str) -> Option<bool> {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" | "true" | "1" | "on" => Some(true),
        "n" | "no" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_answers_and_defaults() {
        let p = ScriptedPrompter::new(["", "yes", "2", "MeshBot"]);
        assert_eq!(p.input("Port", Some("/dev/ttyUSB0")).unwrap(), "/dev/ttyUSB0");
        assert!(p.confirm("Continue?", false).unwrap());
        assert_eq!(p.choose("Pick", &["a", "b", "c"], 0).unwrap(), 1);
        assert_eq!(p.input("Name", None).unwrap(), "MeshBot");
        assert_eq!(p.remaining(), 0);
    }

    #[test]
    fn test_exhausted_script_is_eof() {
        let p = ScriptedPrompter::new(Vec::<String>::new());
        let err = p.confirm("Anything?", true).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(p.asked(), vec!["Anything?".to_string()]);
    }

    #[test]
    fn test_out_of_range_choice_takes_default() {
        let p = ScriptedPrompter::new(["9"]);
        assert_eq!(p.choose("Pick", &["a", "b"], 1).unwrap(), 1);
    }

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no(" Y "), Some(true));
        assert_eq!(parse_yes_no("off"), Some(false));
        assert_eq!(parse_yes_no("maybe"), None);
    }

    #[test]
    fn test_notices_recorded() {
        let p = ScriptedPrompter::default();
        p.notify(Notice::Warning, "careful");
        p.notify(Notice::Success, "done");
        assert_eq!(p.notices_of(Notice::Warning), vec!["careful".to_string()]);
        assert_eq!(p.notices().len(), 2);
    }
}
