//! Request templates: XML documents with `{name}` placeholders.
//!
//! A template is loaded once per test-case type and never changes afterwards;
//! [`RequestTemplate::substitute`] always works on a fresh copy of the text.

use crate::{
    error::{Error, Result},
    xml,
};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
    sync::Arc,
};
use tracing::debug;

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex =
        Regex::new(r"\{(?P<name>[A-Za-z_][A-Za-z0-9_.\-]*)\}").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTemplate {
    name: Cow<'static, str>,
    text: Cow<'static, str>,
}

impl RequestTemplate {
    /// Template over static text, usable in a `static` item.
    pub const fn from_static(name: &'static str, text: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            text: Cow::Borrowed(text),
        }
    }

    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, text: S2) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            text: Cow::Owned(text.into()),
        }
    }

    /// Reads a UTF-8 template file. The template is named after the file stem.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for capture in PLACEHOLDER_REGEX.captures_iter(&self.text) {
            let name = capture.name("name").map(|m| m.as_str()).unwrap_or_default();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Replaces every placeholder with its bound value, escaped for XML.
    ///
    /// An unbound placeholder is an error (`MissingBinding`) rather than being
    /// passed through. The result must be well-formed XML, otherwise the
    /// substitution fails with `InvalidTemplate`.
    pub fn substitute(&self, bindings: &HashMap<String, String>) -> Result<String> {
        self.substitute_with_raw(bindings, &[])
    }

    /// Like [`substitute`](Self::substitute), but placeholders listed in `raw`
    /// take their value as an XML fragment, inserted without escaping.
    pub fn substitute_with_raw(
        &self,
        bindings: &HashMap<String, String>,
        raw: &[&str],
    ) -> Result<String> {
        if let Some(missing) = self
            .placeholders()
            .into_iter()
            .find(|name| !bindings.contains_key(*name))
        {
            return Err(Error::MissingBinding(missing.to_string()));
        }

        let output = PLACEHOLDER_REGEX.replace_all(&self.text, |captures: &Captures| {
            let name = &captures["name"];
            let value = &bindings[name];
            if raw.contains(&name) {
                value.clone()
            } else {
                xml::escape(value)
            }
        });

        xml::check_well_formed(&output).map_err(|reason| Error::InvalidTemplate {
            name: self.name.to_string(),
            reason,
        })?;

        debug!(template = %self.name, raw = raw.len(), "request body built from template");

        Ok(output.into_owned())
    }
}

/// Every `*.xml` template in a directory, keyed by file stem.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, Arc<RequestTemplate>>,
}

impl TemplateSet {
    pub fn load_dir<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let mut templates = BTreeMap::new();

        for entry in fs::read_dir(directory.as_ref())? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "xml") {
                let template = RequestTemplate::load(&path)?;
                templates.insert(template.name().to_string(), Arc::new(template));
            }
        }

        debug!(
            directory = %directory.as_ref().display(),
            count = templates.len(),
            "templates loaded"
        );

        Ok(Self { templates })
    }

    pub fn insert(&mut self, template: RequestTemplate) {
        self.templates
            .insert(template.name().to_string(), Arc::new(template));
    }

    pub fn get(&self, name: &str) -> Option<Arc<RequestTemplate>> {
        self.templates.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
