//! Request path classification.

use regex::Regex;

use crate::error::Result;

/// Decides which request paths get session handling.
///
/// Patterns must match the whole path (after the context prefix is
/// stripped), not a substring. Except-patterns win over only-patterns.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    only: Option<Vec<Regex>>,
    except: Option<Vec<Regex>>,
}

impl PathFilter {
    /// A filter that wraps every path.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Compile only/except pattern lists. Blank patterns are skipped and an
    /// empty list means "not configured".
    pub fn new<S: AsRef<str>>(only: &[S], except: &[S]) -> Result<Self> {
        Ok(Self {
            only: compile(only)?,
            except: compile(except)?,
        })
    }

    /// Parse comma-separated pattern lists.
    pub fn from_comma_lists(only: Option<&str>, except: Option<&str>) -> Result<Self> {
        let split = |list: Option<&str>| -> Vec<String> {
            list.map(|l| l.split(',').map(str::to_string).collect())
                .unwrap_or_default()
        };
        Self::new(&split(only), &split(except))
    }

    /// Whether a request should get session handling.
    pub fn should_wrap(&self, context_path: &str, request_path: &str) -> bool {
        let path = request_path
            .strip_prefix(context_path)
            .unwrap_or(request_path);

        if let Some(only) = &self.only
            && !only.iter().any(|p| p.is_match(path))
        {
            return false;
        }

        if let Some(except) = &self.except
            && except.iter().any(|p| p.is_match(path))
        {
            return false;
        }

        true
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Option<Vec<Regex>>> {
    let compiled = patterns
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(&format!("^(?:{})$", p)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(if compiled.is_empty() {
        None
    } else {
        Some(compiled)
    })
}
