//! Resolution of `${VAR}` references in the mesh auth key.

use super::ProvisioningError;

/// Environment variable named by a `${VAR}` reference, if `raw` is one.
#[must_use]
pub fn referenced_variable(raw: &str) -> Option<&str> {
    raw.trim()
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// Returns the literal key, or the value of the referenced variable.
///
/// # Errors
///
/// Returns [`ProvisioningError::MissingAuthKey`] when the referenced variable
/// is unset or blank.
pub fn resolve_auth_key<L>(raw: &str, lookup: &L) -> Result<String, ProvisioningError>
where
    L: Fn(&str) -> Option<String> + ?Sized,
{
    let Some(variable) = referenced_variable(raw) else {
        return Ok(raw.trim().to_owned());
    };
    lookup(variable)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ProvisioningError::MissingAuthKey {
            variable: variable.to_owned(),
        })
}
