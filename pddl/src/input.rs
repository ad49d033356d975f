use std::sync::Arc;

/// A source text (file or literal string), cheap to clone so that every span
/// can carry a handle to the text it points into.
#[derive(Clone)]
pub struct Input {
    text: Arc<String>,
    source: Option<String>,
}

impl Input {
    pub fn from_string(input: impl ToString) -> Input {
        Input {
            text: Arc::new(input.to_string()),
            source: None,
        }
    }

    pub fn from_file(file: &std::path::Path) -> std::result::Result<Input, std::io::Error> {
        let s = std::fs::read_to_string(file)?;
        Ok(Input {
            text: Arc::new(s),
            source: Some(file.display().to_string()),
        })
    }

    pub fn text(&self) -> &str {
        self.text.as_str()
    }

    /// Name of the file this input was read from, if any.
    pub fn origin(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Input::from_string(s)
    }
}

impl TryFrom<&std::path::Path> for Input {
    type Error = std::io::Error;

    fn try_from(path: &std::path::Path) -> Result<Self, Self::Error> {
        Input::from_file(path)
    }
}

// identity of the backing text: all spans of one parse share the same Arc
impl PartialEq for Input {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.text, &other.text)
    }
}
impl Eq for Input {}

impl std::hash::Hash for Input {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.text), state)
    }
}
