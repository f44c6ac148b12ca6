//! Target-language clusters and the catalogue of accepted compiler/runtime versions.
//!
//! A cluster name coming from a dataset record is resolved once, through
//! `LangCluster::from_str`, and then looked up in an `EnvironmentCatalogue`.
//! Both steps fail with `UnknownLanguageCluster` instead of yielding a
//! prompt without version labels.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CpError, CpResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LangCluster {
    Cpp,
    CSharp,
    Java,
    JavaScript,
    C,
    Python,
    Php,
    Ruby,
    Kotlin,
    Rust,
    Go,
    D,
    Delphi,
    Perl,
}

impl LangCluster {
    pub const ALL: [LangCluster; 14] = [
        Self::Cpp,
        Self::CSharp,
        Self::Java,
        Self::JavaScript,
        Self::C,
        Self::Python,
        Self::Php,
        Self::Ruby,
        Self::Kotlin,
        Self::Rust,
        Self::Go,
        Self::D,
        Self::Delphi,
        Self::Perl,
    ];

    /// Lowercase name as it appears in prompts and dataset records.
    pub fn name(self) -> &'static str {
        match self {
            Self::Cpp => "c++",
            Self::CSharp => "c#",
            Self::Java => "java",
            Self::JavaScript => "javascript",
            Self::C => "c",
            Self::Python => "python",
            Self::Php => "php",
            Self::Ruby => "ruby",
            Self::Kotlin => "kotlin",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::D => "d",
            Self::Delphi => "delphi",
            Self::Perl => "perl",
        }
    }

    /// Judge environments accepted for this cluster.
    pub fn accepted_versions(self) -> &'static [&'static str] {
        match self {
            Self::Cpp => &[
                "GNU C++11",
                "GNU C++14",
                "MS C++",
                "GNU C++0x",
                "GNU C++",
                "MS C++ 2017",
                "Clang++17 Diagnostics",
                "GNU C++17",
            ],
            Self::CSharp => &["MS C#", "Mono C#", ".NET Core C#"],
            Self::Java => &["Java 11", "Java 7", "Java 6", "Java 8"],
            Self::JavaScript => &["JavaScript", "Node.js"],
            Self::C => &["GNU C", "GNU C11"],
            Self::Python => &["Python 2", "PyPy 3", "Python 3", "PyPy 2"],
            Self::Php => &["PHP"],
            Self::Ruby => &["Ruby"],
            Self::Kotlin => &["Kotlin"],
            Self::Rust => &["Rust"],
            Self::Go => &["Go"],
            Self::D => &["dmd 2.105.0 win32"],
            Self::Delphi => &["Delphi7 win32"],
            Self::Perl => &["Perl v5.20.3"],
        }
    }

    /// Info-string tags that mark a fenced block as source in this cluster.
    pub fn fence_tags(self) -> &'static [&'static str] {
        match self {
            Self::Cpp => &["cpp", "c++"],
            Self::CSharp => &["csharp", "cs", "c#"],
            Self::Java => &["java"],
            Self::JavaScript => &["javascript", "js"],
            Self::C => &["c"],
            Self::Python => &["python"],
            Self::Php => &["php"],
            Self::Ruby => &["ruby"],
            Self::Kotlin => &["kotlin"],
            Self::Rust => &["rust"],
            Self::Go => &["go"],
            Self::D => &["d"],
            Self::Delphi => &["delphi", "pascal"],
            Self::Perl => &["perl"],
        }
    }

    /// Version label assigned to code recovered from a bare fenced block.
    pub fn canonical_version(self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::Cpp => "GNU C++17",
            Self::C => "GNU C11",
            Self::Java => "Java 8",
            Self::CSharp => ".NET Core C#",
            Self::JavaScript => "Node.js",
            other => other.accepted_versions()[0],
        }
    }
}

impl fmt::Display for LangCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LangCluster {
    type Err = CpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.name() == lower)
            .ok_or_else(|| CpError::UnknownLanguageCluster(s.to_string()))
    }
}

/// Mapping from cluster to the ordered version labels a prompt may offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentCatalogue {
    entries: BTreeMap<LangCluster, Vec<String>>,
}

impl EnvironmentCatalogue {
    /// Every cluster with its full judge environment list.
    pub fn codeforces() -> Self {
        let entries = LangCluster::ALL
            .into_iter()
            .map(|c| {
                let versions = c.accepted_versions().iter().map(|v| v.to_string()).collect();
                (c, versions)
            })
            .collect();
        Self { entries }
    }

    /// A catalogue covering only the given clusters, with caller-supplied labels.
    pub fn restricted<I, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (LangCluster, V)>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(c, vs)| (c, vs.into_iter().map(Into::into).collect()))
            .collect();
        Self { entries }
    }

    /// Python only, labelled `python2`/`python3`.
    pub fn python_only() -> Self {
        Self::restricted([(LangCluster::Python, ["python2", "python3"])])
    }

    /// Resolve a raw cluster name to its cluster and accepted versions.
    pub fn lookup(&self, cluster: &str) -> CpResult<(LangCluster, &[String])> {
        let parsed: LangCluster = cluster.parse()?;
        self.entries
            .get(&parsed)
            .map(|v| (parsed, v.as_slice()))
            .ok_or_else(|| CpError::UnknownLanguageCluster(cluster.to_string()))
    }

    pub fn clusters(&self) -> impl Iterator<Item = LangCluster> + '_ {
        self.entries.keys().copied()
    }
}

impl Default for EnvironmentCatalogue {
    fn default() -> Self {
        Self::codeforces()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_case_insensitive() {
        assert_eq!("Python".parse::<LangCluster>().unwrap(), LangCluster::Python);
        assert_eq!("C++".parse::<LangCluster>().unwrap(), LangCluster::Cpp);
        assert_eq!(" c# ".parse::<LangCluster>().unwrap(), LangCluster::CSharp);
    }

    #[test]
    fn test_parse_unknown_cluster() {
        let err = "cobol".parse::<LangCluster>().unwrap_err();
        assert!(matches!(err, CpError::UnknownLanguageCluster(ref s) if s == "cobol"));
    }

    #[test]
    fn test_names_roundtrip_for_all_clusters() {
        for c in LangCluster::ALL {
            assert_eq!(c.name().parse::<LangCluster>().unwrap(), c);
            assert!(!c.accepted_versions().is_empty());
            assert!(!c.fence_tags().is_empty());
        }
    }

    #[test]
    fn test_codeforces_catalogue_lookup() {
        let catalogue = EnvironmentCatalogue::codeforces();
        let (cluster, versions) = catalogue.lookup("java").unwrap();
        assert_eq!(cluster, LangCluster::Java);
        assert_eq!(versions, ["Java 11", "Java 7", "Java 6", "Java 8"]);
        assert_eq!(catalogue.clusters().count(), 14);
    }

    #[test]
    fn test_restricted_catalogue_rejects_missing_cluster() {
        let catalogue = EnvironmentCatalogue::python_only();
        let (_, versions) = catalogue.lookup("python").unwrap();
        assert_eq!(versions, ["python2", "python3"]);
        let err = catalogue.lookup("rust").unwrap_err();
        assert!(matches!(err, CpError::UnknownLanguageCluster(ref s) if s == "rust"));
    }

    #[test]
    fn test_canonical_version_python() {
        assert_eq!(LangCluster::Python.canonical_version(), "python3");
        assert_eq!(LangCluster::Perl.canonical_version(), "Perl v5.20.3");
    }
}
