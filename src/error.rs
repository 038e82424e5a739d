//! Error types for COLLADA conversion.

use thiserror::Error;

/// Errors that can occur while reading, converting or writing COLLADA scenes.
#[derive(Debug, Error)]
pub enum ColladaError {
    /// XML parsing error.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// A required element is missing, or the document has no usable content.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// A SIDREF, URL, bind symbol or parameter did not resolve.
    #[error("unresolved reference '{reference}' from {context}")]
    UnresolvedReference {
        /// The reference text as written in the document.
        reference: String,
        /// Where resolution started.
        context: String,
    },

    /// A geometry, equation, transform or axis kind that is not understood.
    #[error("unsupported shape: {0}")]
    UnsupportedShape(String),

    /// An element holds text that is not a list of numbers.
    #[error("invalid number '{value}' in <{element}>")]
    InvalidNumber {
        /// The element containing the value.
        element: String,
        /// The offending token.
        value: String,
    },

    /// Kinematic loop detected.
    #[error("kinematic loop detected: {0}")]
    KinematicLoop(String),

    /// Reference to a link that was never extracted.
    #[error("reference to undefined link: {link_name} in joint {joint_name}")]
    UndefinedLink {
        /// The link name that was referenced.
        link_name: String,
        /// The joint that referenced it.
        joint_name: String,
    },

    /// No root link found.
    #[error("no root link found (all links are children of joints)")]
    NoRootLink,

    /// Multiple root links found.
    #[error("multiple root links found: {0:?}")]
    MultipleRootLinks(Vec<String>),

    /// The mesh import collaborator failed.
    #[error("mesh import failed: {0}")]
    Import(String),
}

impl ColladaError {
    /// Create a malformed document error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedDocument(message.into())
    }

    /// Create an unresolved reference error.
    pub fn unresolved(reference: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            reference: reference.into(),
            context: context.into(),
        }
    }

    /// Create an unsupported shape error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::UnsupportedShape(what.into())
    }

    /// Create an invalid number error.
    pub fn invalid_number(element: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidNumber {
            element: element.into(),
            value: value.into(),
        }
    }

    /// Create an undefined link error.
    pub fn undefined_link(link_name: impl Into<String>, joint_name: impl Into<String>) -> Self {
        Self::UndefinedLink {
            link_name: link_name.into(),
            joint_name: joint_name.into(),
        }
    }

    /// Whether this error aborts a whole conversion.
    ///
    /// Unresolved references and unsupported shapes are recovered locally by
    /// skipping the dependent feature; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnresolvedReference { .. } | Self::UnsupportedShape(_) | Self::Import(_)
        )
    }
}

/// Result type for COLLADA operations.
pub type Result<T> = std::result::Result<T, ColladaError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_display() {
        let err = ColladaError::unresolved("kmodel0/joint1", "attachment_full");
        assert!(err.to_string().contains("kmodel0/joint1"));
        assert!(err.to_string().contains("attachment_full"));
    }

    #[test]
    fn test_invalid_number() {
        let err = ColladaError::invalid_number("float_array", "1.0x");
        assert!(err.to_string().contains("float_array"));
        assert!(err.to_string().contains("1.0x"));
    }

    #[test]
    fn test_fatality() {
        assert!(!ColladaError::unresolved("a", "b").is_fatal());
        assert!(!ColladaError::unsupported("polygons").is_fatal());
        assert!(ColladaError::malformed("no scene").is_fatal());
        assert!(ColladaError::NoRootLink.is_fatal());
        assert!(ColladaError::MultipleRootLinks(vec!["a".into(), "b".into()]).is_fatal());
    }
}
