//! Block style YAML emitter.
//!
//! `serde_yaml` cannot attach comments to nodes, so resources are written
//! by this emitter instead. It produces the same layout `kpt` and
//! `kustomize` produce: mappings are indented by two spaces, sequences
//! are not indented relative to their key, and line comments are placed
//! after the value (scalars) or the key (containers) they belong to.
use std::{collections::BTreeMap, fmt::Write as _};

use krm_fieldspec::{FieldPath, Step};
use serde_yaml::{Mapping, Value, value::TaggedValue};
use snafu::{ResultExt, Snafu};

const INDENT: usize = 2;

pub type Comments = BTreeMap<FieldPath, String>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to format scalar value"))]
    FormatScalar { source: serde_yaml::Error },

    #[snafu(display("failed to format multi-line string"))]
    FormatMultiline { source: serde_json::Error },
}

/// Writes YAML documents into a string buffer.
#[derive(Debug, Default)]
pub struct Emitter {
    out: String,
    documents: usize,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` as a separate document.
    pub fn document(&mut self, value: &Value, comments: &Comments) -> Result<(), Error> {
        if self.documents > 0 {
            self.out.push_str("---\n");
        }
        self.documents += 1;

        let path = FieldPath::new();
        match untag(value) {
            (_, Value::Mapping(mapping)) if !mapping.is_empty() => {
                self.mapping(mapping, &path, comments, 0, false)
            }
            (_, Value::Sequence(sequence)) if !sequence.is_empty() => {
                self.sequence(sequence, &path, comments, 0)
            }
            _ => {
                let scalar = inline(value)?;
                self.out.push_str(&scalar);
                self.out.push('\n');
                Ok(())
            }
        }
    }

    /// Writes a top level `key: value` entry. Used to assemble documents
    /// whose entries come from different sources.
    pub fn entry(&mut self, key: &str, value: &Value) -> Result<(), Error> {
        self.key_value(
            &Value::String(key.to_owned()),
            value,
            &FieldPath::new(),
            &Comments::new(),
            0,
        )
    }

    /// Writes a top level `key:` followed by one sequence element per item,
    /// each with its own comments.
    pub fn entry_with_items<'a>(
        &mut self,
        key: &str,
        items: impl IntoIterator<Item = (&'a Value, &'a Comments)>,
    ) -> Result<(), Error> {
        let mut items = items.into_iter().peekable();
        self.out.push_str(&format_key(&Value::String(key.to_owned()))?);
        if items.peek().is_none() {
            self.out.push_str(": []\n");
            return Ok(());
        }
        self.out.push_str(":\n");

        for (value, comments) in items {
            self.element(value, &FieldPath::new(), comments, 0)?;
        }
        Ok(())
    }

    pub fn finish(self) -> String {
        self.out
    }

    fn mapping(
        &mut self,
        mapping: &Mapping,
        path: &FieldPath,
        comments: &Comments,
        indent: usize,
        inline_first: bool,
    ) -> Result<(), Error> {
        for (index, (key, value)) in mapping.iter().enumerate() {
            if index > 0 || !inline_first {
                self.pad(indent);
            }
            let child = match key.as_str() {
                Some(key) => path.join(Step::Key(key.to_owned())),
                None => path.clone(),
            };
            self.key_value(key, value, &child, comments, indent)?;
        }
        Ok(())
    }

    /// Writes `key: value` with the cursor already at the key position.
    fn key_value(
        &mut self,
        key: &Value,
        value: &Value,
        path: &FieldPath,
        comments: &Comments,
        indent: usize,
    ) -> Result<(), Error> {
        let key = format_key(key)?;
        self.out.push_str(&key);
        self.out.push(':');

        let (tag, value) = untag(value);
        if let Some(tag) = tag {
            write!(self.out, " {tag}").ok();
        }

        match value {
            Value::Mapping(mapping) if !mapping.is_empty() => {
                self.comment(path, comments);
                self.out.push('\n');
                self.mapping(mapping, path, comments, indent + INDENT, false)
            }
            Value::Sequence(sequence) if !sequence.is_empty() => {
                self.comment(path, comments);
                self.out.push('\n');
                self.sequence(sequence, path, comments, indent)
            }
            _ => {
                let scalar = inline(value)?;
                self.out.push(' ');
                self.out.push_str(&scalar);
                self.comment(path, comments);
                self.out.push('\n');
                Ok(())
            }
        }
    }

    fn sequence(
        &mut self,
        sequence: &[Value],
        path: &FieldPath,
        comments: &Comments,
        indent: usize,
    ) -> Result<(), Error> {
        for (index, element) in sequence.iter().enumerate() {
            self.element(element, &path.join(Step::Index(index)), comments, indent)?;
        }
        Ok(())
    }

    fn element(
        &mut self,
        element: &Value,
        path: &FieldPath,
        comments: &Comments,
        indent: usize,
    ) -> Result<(), Error> {
        self.pad(indent);
        self.out.push('-');

        let (tag, element) = untag(element);
        if let Some(tag) = tag {
            write!(self.out, " {tag}").ok();
        }

        match element {
            Value::Mapping(mapping) if !mapping.is_empty() => {
                if tag.is_some() {
                    self.out.push('\n');
                    self.mapping(mapping, path, comments, indent + INDENT, false)
                } else {
                    self.out.push(' ');
                    self.mapping(mapping, path, comments, indent + INDENT, true)
                }
            }
            Value::Sequence(sequence) if !sequence.is_empty() => {
                self.out.push('\n');
                self.sequence(sequence, path, comments, indent + INDENT)
            }
            _ => {
                let scalar = inline(element)?;
                self.out.push(' ');
                self.out.push_str(&scalar);
                self.comment(path, comments);
                self.out.push('\n');
                Ok(())
            }
        }
    }

    fn comment(&mut self, path: &FieldPath, comments: &Comments) {
        if let Some(comment) = comments.get(path) {
            let comment = comment.trim();
            if comment.starts_with('#') {
                write!(self.out, " {comment}").ok();
            } else {
                write!(self.out, " # {comment}").ok();
            }
        }
    }

    fn pad(&mut self, indent: usize) {
        self.out.extend(std::iter::repeat_n(' ', indent));
    }
}

/// Writes `documents` as a multi-document stream.
pub fn to_string<'a>(
    documents: impl IntoIterator<Item = (&'a Value, &'a Comments)>,
) -> Result<String, Error> {
    let mut emitter = Emitter::new();
    for (value, comments) in documents {
        emitter.document(value, comments)?;
    }
    Ok(emitter.finish())
}

fn untag(value: &Value) -> (Option<&serde_yaml::value::Tag>, &Value) {
    match value {
        Value::Tagged(tagged) => {
            let TaggedValue { tag, value } = tagged.as_ref();
            (Some(tag), value)
        }
        value => (None, value),
    }
}

/// Formats scalars and empty containers on a single line.
fn inline(value: &Value) -> Result<String, Error> {
    match value {
        Value::Null => Ok("null".to_owned()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if s.contains('\n') => {
            serde_json::to_string(s).context(FormatMultilineSnafu)
        }
        Value::String(_) => {
            let formatted = serde_yaml::to_string(value).context(FormatScalarSnafu)?;
            Ok(formatted.trim_end_matches('\n').to_owned())
        }
        Value::Mapping(_) => Ok("{}".to_owned()),
        Value::Sequence(_) => Ok("[]".to_owned()),
        Value::Tagged(tagged) => Ok(format!("{} {}", tagged.tag, inline(&tagged.value)?)),
    }
}

fn format_key(key: &Value) -> Result<String, Error> {
    match key {
        Value::String(_) | Value::Bool(_) | Value::Number(_) | Value::Null => inline(key),
        // Complex keys are rare in resources, fall back to flow style.
        other => serde_json::to_string(other).context(FormatMultilineSnafu),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn parse(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).expect("test YAML is valid")
    }

    #[test]
    fn block_layout() {
        let input = indoc! {r#"
            apiVersion: v1
            kind: ConfigMap
            metadata:
              name: cm
              labels: {}
            data:
              replicas: '4'
              enabled: "true"
              script: "echo one\necho two\n"
            environments:
            - dev
            - stage
            containers:
            - name: app
              ports:
              - 80
              - 443
        "#};

        let output =
            to_string([(&parse(input), &Comments::new())]).expect("document can be emitted");
        assert_eq!(output, indoc! {r#"
            apiVersion: v1
            kind: ConfigMap
            metadata:
              name: cm
              labels: {}
            data:
              replicas: '4'
              enabled: 'true'
              script: "echo one\necho two\n"
            environments:
            - dev
            - stage
            containers:
            - name: app
              ports:
              - 80
              - 443
        "#});
        assert_eq!(parse(&output), parse(input));
    }

    #[test]
    fn line_comments() {
        let value = parse(indoc! {"
            spec:
              image: nginx
              environments:
              - dev
              - stage
        "});
        let mut comments = Comments::new();
        comments.insert(["spec", "image"].into_iter().collect(), "kpt-set: ${image}".to_owned());
        comments.insert(
            ["spec", "environments"].into_iter().collect(),
            "# kpt-set: ${env}".to_owned(),
        );

        let output = to_string([(&value, &comments)]).expect("document can be emitted");
        assert_eq!(output, indoc! {"
            spec:
              image: nginx # kpt-set: ${image}
              environments: # kpt-set: ${env}
              - dev
              - stage
        "});
    }

    #[test]
    fn multiple_documents() {
        let first = parse("a: 1");
        let second = parse("b: 2");
        let comments = Comments::new();

        let output = to_string([(&first, &comments), (&second, &comments)])
            .expect("documents can be emitted");
        assert_eq!(output, "a: 1\n---\nb: 2\n");
    }

    #[test]
    fn items_entry() {
        let first = parse("kind: A\nlist:\n- x: 1\n  y: 2\n");
        let comments = Comments::new();

        let mut emitter = Emitter::new();
        emitter
            .entry("kind", &Value::String("ResourceList".to_owned()))
            .expect("entry can be emitted");
        emitter.entry_with_items("items", [(&first, &comments)]).expect("items can be emitted");
        emitter.entry_with_items("results", []).expect("items can be emitted");

        assert_eq!(emitter.finish(), indoc! {"
            kind: ResourceList
            items:
            - kind: A
              list:
              - x: 1
                y: 2
            results: []
        "});
    }
}
