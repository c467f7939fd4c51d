//! Error Categories
//!
//! The closed taxonomy a failed trial run is classified into. Variants are
//! declared in match priority order: the classifier walks its signature table
//! in this order and the first category whose pattern matches wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ImportResolution,
    ExportConstructor,
    LocatorNotFound,
    SelectorAmbiguity,
    MissingDataFile,
    TypeError,
    SyntaxError,
    MissingMethod,
    Compilation,
}

impl ErrorCategory {
    /// All categories, highest priority first.
    pub const ALL: [ErrorCategory; 9] = [
        ErrorCategory::ImportResolution,
        ErrorCategory::ExportConstructor,
        ErrorCategory::LocatorNotFound,
        ErrorCategory::SelectorAmbiguity,
        ErrorCategory::MissingDataFile,
        ErrorCategory::TypeError,
        ErrorCategory::SyntaxError,
        ErrorCategory::MissingMethod,
        ErrorCategory::Compilation,
    ];

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::ImportResolution => "IMPORT_RESOLUTION",
            ErrorCategory::ExportConstructor => "EXPORT_CONSTRUCTOR",
            ErrorCategory::LocatorNotFound => "LOCATOR_NOT_FOUND",
            ErrorCategory::SelectorAmbiguity => "SELECTOR_AMBIGUITY",
            ErrorCategory::MissingDataFile => "MISSING_DATA_FILE",
            ErrorCategory::TypeError => "TYPE_ERROR",
            ErrorCategory::SyntaxError => "SYNTAX_ERROR",
            ErrorCategory::MissingMethod => "MISSING_METHOD",
            ErrorCategory::Compilation => "COMPILATION",
        }
    }

    /// One-line description, phrased for a reader fixing the script.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ImportResolution => "a module import could not be resolved",
            ErrorCategory::ExportConstructor => {
                "an imported class is not exported or is not a constructor"
            }
            ErrorCategory::LocatorNotFound => "a locator did not match any element before timing out",
            ErrorCategory::SelectorAmbiguity => "a locator matched more than one element",
            ErrorCategory::MissingDataFile => "a test data file referenced by the script is missing",
            ErrorCategory::TypeError => "a value had an unexpected type at runtime",
            ErrorCategory::SyntaxError => "the script contains a syntax error",
            ErrorCategory::MissingMethod => "a method or property does not exist on the target object",
            ErrorCategory::Compilation => "the script failed to compile",
        }
    }

    /// Recovery hint shown next to a terminal result.
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorCategory::ImportResolution => "Check relative import paths and file extensions",
            ErrorCategory::ExportConstructor => "Export the page class from its module",
            ErrorCategory::LocatorNotFound | ErrorCategory::SelectorAmbiguity => {
                "Record the flow again or pick a more specific locator"
            }
            ErrorCategory::MissingDataFile => "Provide the data file the test reads",
            ErrorCategory::TypeError
            | ErrorCategory::SyntaxError
            | ErrorCategory::MissingMethod
            | ErrorCategory::Compilation => "Review the generated script by hand",
        }
    }

    /// Categories repaired by swapping a locator.
    pub fn is_locator(&self) -> bool {
        matches!(
            self,
            ErrorCategory::LocatorNotFound | ErrorCategory::SelectorAmbiguity
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown error category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for ErrorCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.code() == normalized)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}
