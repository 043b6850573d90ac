//! Naming grammar of an input file hierarchy

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{FinderError, FinderResult};
use crate::models::{DeterminerKind, DeterminerValue, Determiners};

/// Name and interpretation of one determiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminerSpec {
    pub name: String,
    #[serde(default)]
    pub kind: DeterminerKind,
}

impl DeterminerSpec {
    pub fn new(name: impl Into<String>, kind: DeterminerKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Layout of a hierarchy: `root/<unit_dir>/<level>.../<file_name>`.
///
/// The file name pattern has one capture group per determiner, in order.
/// The unit directory pattern captures the first determiner, and each
/// level pattern may capture the determiner at its depth; those captures
/// let lookups prune whole subtrees.
#[derive(Debug, Clone)]
pub struct NamingGrammar {
    pub(crate) unit_dir: Regex,
    pub(crate) levels: Vec<Regex>,
    pub(crate) file_name: Regex,
    pub(crate) determiners: Vec<DeterminerSpec>,
    pub(crate) min_file_size: u64,
}

fn anchored(pattern: &str) -> FinderResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| FinderError::Grammar(format!("bad pattern {:?}: {}", pattern, e)))
}

impl NamingGrammar {
    pub fn new<S: AsRef<str>>(
        unit_dir: &str,
        levels: &[S],
        file_name: &str,
        determiners: Vec<DeterminerSpec>,
        min_file_size: u64,
    ) -> FinderResult<Self> {
        let unit_dir = anchored(unit_dir)?;
        let levels = levels
            .iter()
            .map(|l| anchored(l.as_ref()))
            .collect::<FinderResult<Vec<_>>>()?;
        let file_name = anchored(file_name)?;

        if determiners.is_empty() {
            return Err(FinderError::Grammar("no determiners".to_string()));
        }
        // captures_len counts the implicit whole-match group
        if file_name.captures_len() - 1 != determiners.len() {
            return Err(FinderError::Grammar(format!(
                "file name pattern has {} capture groups for {} determiners",
                file_name.captures_len() - 1,
                determiners.len()
            )));
        }
        if unit_dir.captures_len() < 2 {
            return Err(FinderError::Grammar(
                "unit directory pattern must capture the first determiner".to_string(),
            ));
        }

        Ok(Self {
            unit_dir,
            levels,
            file_name,
            determiners,
            min_file_size,
        })
    }

    /// Forced-source photometry:
    /// `<visit>-<filter>/R<raft>/forced_<visit>-<filter>-R<raft>-S<sensor>-det<nnn>.fits`.
    ///
    /// Files of 46080 bytes or less hold a header and no rows.
    pub fn forced_source() -> Self {
        let visit_dir = "([0-9]{8})-[ugrizy]";
        let file_name = format!(
            r"forced_{}-R([0-4]{{2}})-S([0-2]{{2}})-det[0-9]{{3}}\.(?:fits|parquet)",
            visit_dir
        );
        let determiners = vec![
            DeterminerSpec::new("visit", DeterminerKind::Int),
            DeterminerSpec::new("raft", DeterminerKind::Text),
            DeterminerSpec::new("sensor", DeterminerKind::Text),
        ];
        Self {
            unit_dir: Regex::new(&format!("^(?:{})$", visit_dir)).expect("Invalid regex"),
            levels: vec![Regex::new(r"^(?:R([0-4]{2}))$").expect("Invalid regex")],
            file_name: Regex::new(&format!("^(?:{})$", file_name)).expect("Invalid regex"),
            determiners,
            min_file_size: 46080,
        }
    }

    pub fn determiners(&self) -> &[DeterminerSpec] {
        &self.determiners
    }

    pub fn determiner_names(&self) -> Vec<&str> {
        self.determiners.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn min_file_size(&self) -> u64 {
        self.min_file_size
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Determiners encoded in a file's base name, if it follows the grammar.
    pub fn parse_file_name(&self, name: &str) -> Option<Determiners> {
        let caps = self.file_name.captures(name)?;
        let mut determiners = Determiners::new();
        for (i, spec) in self.determiners.iter().enumerate() {
            let raw = caps.get(i + 1)?.as_str();
            determiners.push(spec.name.clone(), spec.kind.parse(raw)?);
        }
        Some(determiners)
    }

    /// Whether a directory at `depth` (0 = unit directory) follows the
    /// grammar and, if it captures a determiner, agrees with `partial`.
    pub(crate) fn dir_matches(&self, depth: usize, name: &str, partial: &Determiners) -> bool {
        let pattern = match depth {
            0 => &self.unit_dir,
            d => match self.levels.get(d - 1) {
                Some(p) => p,
                None => return false,
            },
        };
        let Some(caps) = pattern.captures(name) else {
            return false;
        };
        let wanted = partial.iter().nth(depth).map(|(_, v)| v);
        match (wanted, caps.get(1), self.determiners.get(depth)) {
            (Some(wanted), Some(got), Some(spec)) => {
                spec.kind.parse(got.as_str()).as_ref() == Some(wanted)
            }
            _ => true,
        }
    }

    /// Value of the first determiner captured by a unit directory name.
    pub(crate) fn unit_of_dir(&self, name: &str) -> Option<DeterminerValue> {
        let raw = self.unit_dir.captures(name)?.get(1)?.as_str();
        self.determiners.first()?.kind.parse(raw)
    }

    /// Check that `partial` names a leading run of this grammar's determiners.
    pub fn check_partial(&self, partial: &Determiners) -> FinderResult<()> {
        let fits = partial.len() <= self.determiners.len()
            && partial
                .iter()
                .zip(&self.determiners)
                .all(|((name, value), spec)| name == spec.name && value.kind() == spec.kind);
        if fits {
            Ok(())
        } else {
            Err(FinderError::BadKey {
                key: partial.to_string(),
                expected: self.determiner_names().join(", "),
            })
        }
    }
}
