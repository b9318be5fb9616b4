use lazy_static::lazy_static;
use regex::{Captures, Regex};

// Shell-style parameter expansion, following
// https://pubs.opengroup.org/onlinepubs/000095399/basedefs/xbd_chap08.html

lazy_static! {
  pub static ref ENVIRONMENT_VARIABLE_INTERPOLATION_REGEX: Regex = Regex::new(
    r"(?x)
    \$\$|
    \$([[:word:].]+)|
    \$\{([[:word:].]+)(?:(:?-|:?\?)([^}]*))?\}",
  )
  // @expected: the pattern is a constant
  .unwrap();
}

type Warnings = Vec<String>;
type Errors = Vec<String>;

/// Expands `$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR-default}`, `${VAR:?error}` and
/// `${VAR?error}` using `get_env_value`. `$$` is a literal `$`.
///
/// Unknown variables expand to an empty string and produce a warning. Missing
/// required variables are errors.
pub fn interpolate(
  input: &str,
  get_env_value: impl Fn(&str) -> Option<String>,
) -> Result<(String, Warnings), Errors> {
  let mut errors = Vec::new();
  let mut warnings = Vec::new();

  let interpolated = ENVIRONMENT_VARIABLE_INTERPOLATION_REGEX
    .replace_all(input, |caps: &Captures| {
      let flags = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
      let default_or_error = caps
        .get(4)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .to_string();

      let Some(name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
        return "$".to_string();
      };
      let value = get_env_value(name);

      match flags {
        ":-" => match value {
          Some(v) if !v.is_empty() => v,
          _ => default_or_error,
        },
        "-" => value.unwrap_or(default_or_error),
        ":?" => match value {
          Some(v) if !v.is_empty() => v,
          _ => {
            errors.push(format!(
              "non-empty env var required in config. name = {:?}, error = {:?}",
              name, default_or_error
            ));
            String::new()
          }
        },
        "?" => value.unwrap_or_else(|| {
          errors.push(format!(
            "missing env var required in config. name = {:?}, error = {:?}",
            name, default_or_error
          ));
          String::new()
        }),
        _ => value.unwrap_or_else(|| {
          warnings.push(format!("unknown env var in config. name = {:?}", name));
          String::new()
        }),
      }
    })
    .into_owned();

  if errors.is_empty() {
    Ok((interpolated, warnings))
  } else {
    Err(errors)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();

    move |key| vars.get(key).cloned()
  }

  #[test]
  fn expands_variables() {
    let get = env(&[("HOST", "example.com"), ("EMPTY", "")]);

    let (out, warnings) = interpolate("url: https://$HOST/${HOST}", &get).unwrap();
    assert_eq!(out, "url: https://example.com/example.com");
    assert!(warnings.is_empty());

    let (out, _) = interpolate("${EMPTY:-fallback} ${EMPTY-kept} ${NOPE-x}", &get).unwrap();
    assert_eq!(out, "fallback  x");

    let (out, _) = interpolate("price: $$5", &get).unwrap();
    assert_eq!(out, "price: $5");
  }

  #[test]
  fn unknown_variables_warn() {
    let (out, warnings) = interpolate("token: ${TOKEN}", env(&[])).unwrap();

    assert_eq!(out, "token: ");
    assert_eq!(warnings.len(), 1);
  }

  #[test]
  fn required_variables_error() {
    let errors = interpolate("a: ${A?must be set} b: ${B:?must not be empty}", env(&[("B", "")]))
      .unwrap_err();

    assert_eq!(errors.len(), 2);
  }
}
