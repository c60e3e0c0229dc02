// Purpose: Parse and order public package versions the way Python packaging tools do.
// Inputs/Outputs: Turns version text (`2.31.0`, `1.0rc1`, `1!2.0.post3.dev1+abc`) into an ordered value.
// Invariants: Ordering ignores trailing zero release segments; pre-releases sort below their release.
// Gotchas: A dev-only release (`1.0.dev1`) sorts below every pre-release of the same release.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version `{0}`")]
pub struct InvalidVersion(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreKind {
    Alpha,
    Beta,
    Rc,
}

impl PreKind {
    fn label(self) -> &'static str {
        match self {
            PreKind::Alpha => "a",
            PreKind::Beta => "b",
            PreKind::Rc => "rc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LocalSegment {
    Num(u64),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Vec<LocalSegment>,
}

impl Version {
    pub fn parse(raw: &str) -> Result<Self, InvalidVersion> {
        let text = raw.trim().to_ascii_lowercase();
        let text = text.strip_prefix('v').unwrap_or(&text);
        Cursor::new(text)
            .version()
            .ok_or_else(|| InvalidVersion(raw.trim().to_string()))
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    fn cmp_key(&self) -> CmpKey<'_> {
        let mut release = self.release.as_slice();
        while let Some((&0, rest)) = release.split_last() {
            release = rest;
        }
        let pre = match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => Bound::NegInf,
            (None, _, _) => Bound::PosInf,
            (Some(p), _, _) => Bound::Val(p),
        };
        let post = self.post.map(Bound::Val).unwrap_or(Bound::NegInf);
        let dev = self.dev.map(Bound::Val).unwrap_or(Bound::PosInf);
        CmpKey {
            epoch: self.epoch,
            release,
            pre,
            post,
            dev,
            local: &self.local,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Bound<T> {
    NegInf,
    Val(T),
    PosInf,
}

struct CmpKey<'a> {
    epoch: u64,
    release: &'a [u64],
    pre: Bound<(PreKind, u64)>,
    post: Bound<u64>,
    dev: Bound<u64>,
    local: &'a [LocalSegment],
}

fn cmp_local(a: &[LocalSegment], b: &[LocalSegment]) -> Ordering {
    // No local label sorts first; numeric segments outrank text segments.
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = match (x, y) {
            (LocalSegment::Num(x), LocalSegment::Num(y)) => x.cmp(y),
            (LocalSegment::Text(x), LocalSegment::Text(y)) => x.cmp(y),
            (LocalSegment::Num(_), LocalSegment::Text(_)) => Ordering::Greater,
            (LocalSegment::Text(_), LocalSegment::Num(_)) => Ordering::Less,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.cmp_key();
        let b = other.cmp_key();
        a.epoch
            .cmp(&b.epoch)
            .then_with(|| a.release.cmp(b.release))
            .then_with(|| a.pre.cmp(&b.pre))
            .then_with(|| a.post.cmp(&b.post))
            .then_with(|| a.dev.cmp(&b.dev))
            .then_with(|| cmp_local(a.local, b.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release = self
            .release
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&release)?;
        if let Some((kind, n)) = self.pre {
            write!(f, "{}{}", kind.label(), n)?;
        }
        if let Some(n) = self.post {
            write!(f, ".post{}", n)?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{}", n)?;
        }
        if !self.local.is_empty() {
            let local = self
                .local
                .iter()
                .map(|s| match s {
                    LocalSegment::Num(n) => n.to_string(),
                    LocalSegment::Text(t) => t.clone(),
                })
                .collect::<Vec<_>>()
                .join(".");
            write!(f, "+{}", local)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    idx: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            idx: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.idx).copied()
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.idx += 1;
            true
        } else {
            false
        }
    }

    fn eat_sep(&mut self) -> bool {
        if matches!(self.peek(), Some(b'.' | b'-' | b'_')) {
            self.idx += 1;
            return true;
        }
        false
    }

    fn eat_word(&mut self, words: &[&str]) -> Option<usize> {
        let rest = &self.bytes[self.idx..];
        // Longest match first so `preview` wins over `pre`.
        let mut best: Option<(usize, usize)> = None;
        for (i, w) in words.iter().enumerate() {
            if rest.starts_with(w.as_bytes()) && best.map(|(_, len)| w.len() > len).unwrap_or(true)
            {
                best = Some((i, w.len()));
            }
        }
        let (i, len) = best?;
        self.idx += len;
        Some(i)
    }

    fn number(&mut self) -> Option<u64> {
        let start = self.idx;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.idx += 1;
        }
        if start == self.idx {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.idx])
            .ok()?
            .parse()
            .ok()
    }

    fn version(mut self) -> Option<Version> {
        let first = self.number()?;
        let (epoch, mut release) = if self.eat(b'!') {
            (first, vec![self.number()?])
        } else {
            (0, vec![first])
        };
        loop {
            let save = self.idx;
            if self.eat(b'.')
                && let Some(n) = self.number()
            {
                release.push(n);
                continue;
            }
            self.idx = save;
            break;
        }

        let pre = self.pre_segment();
        let post = self.post_segment();
        let dev = self.dev_segment();
        let local = if self.eat(b'+') {
            self.local_segment()?
        } else {
            Vec::new()
        };
        if self.idx != self.bytes.len() {
            return None;
        }
        Some(Version {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    fn pre_segment(&mut self) -> Option<(PreKind, u64)> {
        let save = self.idx;
        self.eat_sep();
        let words = ["a", "alpha", "b", "beta", "c", "rc", "pre", "preview"];
        let Some(i) = self.eat_word(&words) else {
            self.idx = save;
            return None;
        };
        let kind = match i {
            0 | 1 => PreKind::Alpha,
            2 | 3 => PreKind::Beta,
            _ => PreKind::Rc,
        };
        Some((kind, self.implicit_number()))
    }

    fn post_segment(&mut self) -> Option<u64> {
        let save = self.idx;
        if self.eat(b'-')
            && let Some(n) = self.number()
        {
            return Some(n);
        }
        self.idx = save;
        self.eat_sep();
        if self.eat_word(&["post", "rev", "r"]).is_none() {
            self.idx = save;
            return None;
        }
        Some(self.implicit_number())
    }

    fn dev_segment(&mut self) -> Option<u64> {
        let save = self.idx;
        self.eat_sep();
        if self.eat_word(&["dev"]).is_none() {
            self.idx = save;
            return None;
        }
        Some(self.implicit_number())
    }

    fn implicit_number(&mut self) -> u64 {
        let save = self.idx;
        self.eat_sep();
        match self.number() {
            Some(n) => n,
            None => {
                self.idx = save;
                0
            }
        }
    }

    fn local_segment(&mut self) -> Option<Vec<LocalSegment>> {
        let rest = std::str::from_utf8(&self.bytes[self.idx..]).ok()?;
        let mut out = Vec::new();
        for part in rest.split(['.', '-', '_']) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return None;
            }
            out.push(match part.parse::<u64>() {
                Ok(n) => LocalSegment::Num(n),
                Err(_) => LocalSegment::Text(part.to_string()),
            });
        }
        self.idx = self.bytes.len();
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::Version;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).expect("valid version")
    }

    #[test]
    fn release_segments_compare_numerically() {
        assert!(v("2.32.0") > v("2.31.0"));
        assert!(v("1.10") > v("1.9"));
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1!0.1") > v("2.0"));
    }

    #[test]
    fn prerelease_sorts_below_release() {
        let ordered = [
            "1.0.dev0",
            "1.0a1",
            "1.0a2.dev1",
            "1.0a2",
            "1.0b1",
            "1.0rc1",
            "1.0",
            "1.0+local.1",
            "1.0.post1.dev0",
            "1.0.post1",
            "1.1",
        ];
        for pair in ordered.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn normalizes_spelling_variants() {
        assert_eq!(v("1.0-alpha.1"), v("1.0a1"));
        assert_eq!(v("v1.2.3").to_string(), "1.2.3");
        assert_eq!(v("1.0.PREVIEW2").to_string(), "1.0rc2");
        assert_eq!(v("1.0-3").to_string(), "1.0.post3");
        assert_eq!(v("1.0c1"), v("1.0rc1"));
        assert!(v("2.0rc1").is_prerelease());
        assert!(!v("2.0.post1").is_prerelease());
    }

    #[test]
    fn rejects_garbage_and_wildcards() {
        for bad in ["", "abc", "1.2.*", "1..2", "1.0+", "1.0 beta"] {
            assert!(Version::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    proptest! {
        #[test]
        fn prerelease_of_any_release_sorts_below_it(
            major in 0u64..50, minor in 0u64..50, n in 0u64..9
        ) {
            let release = v(&format!("{major}.{minor}"));
            let pre = v(&format!("{major}.{minor}rc{n}"));
            let post = v(&format!("{major}.{minor}.post{n}"));
            prop_assert!(pre < release);
            prop_assert!(release < post);
        }
    }
}
