// Copyright 2018-2024 the Deno authors. MIT license.

use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix used for modules that are only known by their file system path.
pub const FS_PREFIX: &str = "/@fs/";

static TIMESTAMP_QUERY_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\bt=\d{13}&?\b").unwrap());
static IMPORT_QUERY_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"([?&])import=?(?:&|$)").unwrap());
static TRAILING_SEPARATOR_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"[?&]$").unwrap());
static CSS_LANGS_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"\.(css|less|sass|scss|styl|stylus|pcss|postcss|sss)(?:$|\?)")
    .unwrap()
});
static DIRECT_REQUEST_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"[?&]direct\b").unwrap());

/// Strips the query and hash from a url or id.
pub fn clean_url(url: &str) -> &str {
  match url.find(['?', '#']) {
    Some(index) => &url[..index],
    None => url,
  }
}

/// Removes the `t=<timestamp>` query added to urls re-requested after a hot
/// update.
pub fn remove_timestamp_query(url: &str) -> String {
  let url = TIMESTAMP_QUERY_RE.replace(url, "");
  TRAILING_SEPARATOR_RE.replace(&url, "").into_owned()
}

/// Removes the `import` query marker added to non-js imports.
pub fn remove_import_query(url: &str) -> String {
  let url = IMPORT_QUERY_RE.replace(url, "$1");
  TRAILING_SEPARATOR_RE.replace(&url, "").into_owned()
}

/// The key a raw request url is cached under before resolution.
pub fn unresolved_url_key(raw_url: &str) -> String {
  remove_import_query(&remove_timestamp_query(raw_url))
}

pub fn is_direct_css_request(url: &str) -> bool {
  CSS_LANGS_RE.is_match(url) && DIRECT_REQUEST_RE.is_match(url)
}

/// Ids produced by plugins that have no backing file.
pub fn is_virtual_id(id: &str) -> bool {
  id.contains('\0') || id.starts_with("virtual:")
}

/// The extension of the last path segment, including the leading dot.
pub fn extension(path: &str) -> Option<&str> {
  let file_name = path.rsplit('/').next().unwrap_or(path);
  match file_name.rfind('.') {
    Some(0) | None => None,
    Some(index) if index + 1 == file_name.len() => None,
    Some(index) => Some(&file_name[index..]),
  }
}

/// When the resolver maps an extensionless url onto a file, splice the
/// resolved extension into the url before its query so that both spellings
/// index the same way.
pub fn with_resolved_extension(url: &str, resolved_id: &str) -> String {
  if url == resolved_id || is_virtual_id(url) {
    return url.to_string();
  }
  let Some(ext) = extension(clean_url(resolved_id)) else {
    return url.to_string();
  };
  let pathname = clean_url(url);
  if pathname.ends_with(ext) {
    url.to_string()
  } else {
    format!("{}{}{}", pathname, ext, &url[pathname.len()..])
  }
}
