use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

// "pkgA 1.0 has requirement pkgB<4.0.0,>=3.18.0, but you have pkgB 3.19.0."
static WITH_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)has requirement\s+(.+?),\s*but\b").expect("diagnostic pattern is valid")
});

static UP_TO_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)has requirement\s+([^,]*)").expect("diagnostic pattern is valid")
});

static NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)(\[[^\]]*\])?\s*(.*)$")
        .expect("requirement name pattern is valid")
});

/// A version requirement extracted from one `pip check` diagnostic line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub name: String,
    pub constraint: String,
    spec: String,
}

impl Requirement {
    /// The full requirement as written by pip, e.g. `pkgB>=2.0`
    pub fn spec(&self) -> &str {
        &self.spec
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedDiagnostic {
    Requirement(Requirement),
    NoMatch,
}

impl ParsedDiagnostic {
    pub fn into_requirement(self) -> Option<Requirement> {
        match self {
            ParsedDiagnostic::Requirement(requirement) => Some(requirement),
            ParsedDiagnostic::NoMatch => None,
        }
    }
}

/// Extract the requirement named in a "has requirement X, but ..." line.
///
/// The capture stops at ", but" so multi-clause constraints such as
/// `pkgB<4.0.0,>=3.18.0` survive intact; without that tail it stops at the
/// next comma. Anything else is `NoMatch`.
pub fn parse_diagnostic(line: &str) -> ParsedDiagnostic {
    let captured = WITH_TAIL
        .captures(line)
        .or_else(|| UP_TO_COMMA.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim());

    let Some(spec) = captured.filter(|spec| !spec.is_empty()) else {
        return ParsedDiagnostic::NoMatch;
    };

    let Some(caps) = NAME.captures(spec) else {
        return ParsedDiagnostic::NoMatch;
    };

    ParsedDiagnostic::Requirement(Requirement {
        name: caps[1].to_string(),
        constraint: caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
        spec: spec.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(line: &str) -> Requirement {
        parse_diagnostic(line)
            .into_requirement()
            .expect("line should parse")
    }

    #[test]
    fn extracts_simple_requirement() {
        let req = requirement("pkgA 1.0 has requirement pkgB>=2.0, but pkgB 1.5 is installed");
        assert_eq!(req.spec(), "pkgB>=2.0");
        assert_eq!(req.name, "pkgB");
        assert_eq!(req.constraint, ">=2.0");
    }

    #[test]
    fn keeps_comma_separated_constraints() {
        let req = requirement(
            "botocore 1.29.0 has requirement urllib3<1.27,>=1.25.4, but you have urllib3 2.0.4.",
        );
        assert_eq!(req.spec(), "urllib3<1.27,>=1.25.4");
        assert_eq!(req.name, "urllib3");
        assert_eq!(req.constraint, "<1.27,>=1.25.4");
    }

    #[test]
    fn matches_case_insensitively_and_trims() {
        let req =
            requirement("thing 2.0 HAS REQUIREMENT   other==1.0  , BUT other 0.9 is installed");
        assert_eq!(req.spec(), "other==1.0");
    }

    #[test]
    fn falls_back_to_next_comma_without_tail() {
        let req = requirement("tool 1.0 has requirement six>=1.16, which is missing");
        assert_eq!(req.spec(), "six>=1.16");
    }

    #[test]
    fn strips_extras_from_name() {
        let req =
            requirement("app 1.0 has requirement requests[socks]>=2.31, but you have requests 2.0");
        assert_eq!(req.name, "requests");
        assert_eq!(req.constraint, ">=2.31");
        assert_eq!(req.spec(), "requests[socks]>=2.31");
    }

    #[test]
    fn bare_name_has_empty_constraint() {
        let req = requirement("app 1.0 has requirement numpy, but you have numpy 1.0");
        assert_eq!(req.name, "numpy");
        assert!(req.constraint.is_empty());
    }

    #[test]
    fn unrelated_lines_do_not_match() {
        assert_eq!(parse_diagnostic("No broken requirements found."), ParsedDiagnostic::NoMatch);
        assert_eq!(
            parse_diagnostic("pkgA 1.0 requires pkgB, which is not installed."),
            ParsedDiagnostic::NoMatch
        );
        assert_eq!(parse_diagnostic(""), ParsedDiagnostic::NoMatch);
    }

    #[test]
    fn empty_capture_does_not_match() {
        assert_eq!(
            parse_diagnostic("pkgA 1.0 has requirement , but nothing"),
            ParsedDiagnostic::NoMatch
        );
    }
}
