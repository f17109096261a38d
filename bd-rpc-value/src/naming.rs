// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./naming_test.rs"]
mod naming_test;

// Lower cases the first character of a proto method name, giving the generated method name
// (e.g. SayHello -> sayHello).
#[must_use]
pub fn lower_first(name: &str) -> String {
  let mut chars = name.chars();
  chars.next().map_or_else(String::new, |first| {
    first.to_lowercase().chain(chars).collect()
  })
}

// Converts a camelCase (or PascalCase/snake_case) key into kebab-case. Acronyms are kept together
// so that `requestID` becomes `request-id` and `HTTPStatus` becomes `http-status`.
#[must_use]
pub fn kebab_case(key: &str) -> String {
  let chars: Vec<char> = key.chars().collect();
  let mut out = String::with_capacity(key.len() + 4);
  for (i, c) in chars.iter().copied().enumerate() {
    if c == '_' || c == '-' || c.is_whitespace() {
      if !out.is_empty() && !out.ends_with('-') {
        out.push('-');
      }
      continue;
    }

    if c.is_uppercase() && i > 0 && !out.is_empty() && !out.ends_with('-') {
      let prev = chars[i - 1];
      let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
      if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
        out.push('-');
      }
    }

    out.extend(c.to_lowercase());
  }

  while out.ends_with('-') {
    out.pop();
  }
  out
}

// Converts a kebab-case metadata key suffix back into the camelCase context key.
#[must_use]
pub fn camel_case(key: &str) -> String {
  let mut out = String::with_capacity(key.len());
  let mut upper_next = false;
  for c in key.chars() {
    if c == '-' || c == '_' {
      upper_next = !out.is_empty();
      continue;
    }

    if upper_next {
      out.extend(c.to_uppercase());
      upper_next = false;
    } else {
      out.push(c);
    }
  }
  out
}

// Normalizes a type name into its fully qualified form with a leading dot.
#[must_use]
pub fn fully_qualified(type_name: &str) -> String {
  if type_name.starts_with('.') {
    type_name.to_string()
  } else {
    format!(".{type_name}")
  }
}
