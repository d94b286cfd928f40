//! Address book loading and phone-number resolution.
//!
//! The book is a plain text file, one contact per line, `name,phone` or
//! `phone,name` — which side is the number is decided heuristically (a
//! token starting with `+`, or digit-leading and longer than five chars).
//! Resolution normalizes both sides and falls back to last-10-digit
//! suffix matching so a number stored with a country code still matches
//! one reported without it, and vice versa.

use anyhow::Result;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::fs;

/// One address book entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub phone: String,
    pub name: String,
}

/// In-memory address book with optional file backing.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: Vec<Contact>,
    path: Option<PathBuf>,
}

/// Strip spaces, hyphens, parens, and a leading `+` for comparison.
pub fn normalize(number: &str) -> String {
    number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '+'))
        .collect()
}

/// Phone-number equivalence: exact after normalization, or a 10-digit
/// side is the suffix of the longer side (country-code variance).
pub fn numbers_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b
        || (a.len() > 10 && b.len() == 10 && a.ends_with(&b))
        || (a.len() == 10 && b.len() > 10 && b.ends_with(&a))
}

impl AddressBook {
    /// Empty book, no file backing (tests, or no card present).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a book from entries directly.
    pub fn from_entries(entries: Vec<Contact>) -> Self {
        Self {
            entries,
            path: None,
        }
    }

    /// Load from a `name,phone` / `phone,name` file. A missing file is an
    /// empty book, not an error; saves will create it.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut book = Self {
            entries: Vec::new(),
            path: Some(path.clone()),
        };
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no address book at {}, starting empty", path.display());
                return Ok(book);
            }
            Err(e) => return Err(e.into()),
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((part1, part2)) = line.split_once(',') else {
                warn!("skipping malformed address book line: {line}");
                continue;
            };
            let (part1, part2) = (part1.trim(), part2.trim());
            let first_is_phone = part1.starts_with('+')
                || (part1.len() > 5 && part1.chars().next().is_some_and(|c| c.is_ascii_digit()));
            let (phone, name) = if first_is_phone {
                (part1, part2)
            } else {
                (part2, part1)
            };
            debug!("loaded contact: {} -> {}", name, phone);
            book.entries.push(Contact {
                phone: phone.to_string(),
                name: name.to_string(),
            });
        }
        info!(
            "loaded {} contacts from {}",
            book.entries.len(),
            path.display()
        );
        Ok(book)
    }

    /// Rewrite the backing file in `name,phone` form. No-op without one.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut out = String::new();
        for contact in &self.entries {
            out.push_str(&contact.name);
            out.push(',');
            out.push_str(&contact.phone);
            out.push('\n');
        }
        fs::write(path, out).await?;
        info!("saved {} contacts to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// Append a contact and persist. Refuses a number that already
    /// resolves to a name (duplicates would never be reachable anyway).
    pub async fn add(&mut self, phone: &str, name: &str) -> Result<bool> {
        if self.find(phone).is_some() {
            debug!("contact for {phone} already exists");
            return Ok(false);
        }
        self.entries.push(Contact {
            phone: phone.to_string(),
            name: name.to_string(),
        });
        self.save().await?;
        Ok(true)
    }

    /// First entry matching `number`, scan order. When the book holds
    /// ambiguous country-code variants the earlier entry wins; this is
    /// long-standing observed behavior, kept as-is.
    pub fn find(&self, number: &str) -> Option<&Contact> {
        self.entries.iter().find(|c| numbers_match(&c.phone, number))
    }

    /// Display name for a number; unknown numbers resolve to themselves.
    pub fn resolve(&self, number: &str) -> String {
        match self.find(number) {
            Some(contact) => contact.name.clone(),
            None => number.to_string(),
        }
    }

    pub fn entries(&self) -> &[Contact] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
