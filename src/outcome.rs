use std::fmt;
use std::path::{Path, PathBuf};

/// Best-effort step that may fail without failing the operation around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    Ownership,
    Watermark,
    Retention,
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SideEffect::Ownership => "ownership",
            SideEffect::Watermark => "watermark",
            SideEffect::Retention => "retention",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectFailure {
    pub path: PathBuf,
    pub effect: SideEffect,
    pub message: String,
}

impl SideEffectFailure {
    pub fn new(path: &Path, effect: SideEffect, message: impl Into<String>) -> Self {
        let failure = Self {
            path: path.to_path_buf(),
            effect,
            message: message.into(),
        };
        tracing::warn!(
            path = %failure.path.display(),
            effect = %failure.effect,
            "{}",
            failure.message
        );
        failure
    }
}

/// A successful result plus any non-fatal side-effect failures met on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<SideEffectFailure>,
}

impl<T> Outcome<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn push(&mut self, warning: SideEffectFailure) {
        self.warnings.push(warning);
    }

    /// Moves the warnings of a nested outcome into this one and yields its value.
    pub fn absorb<U>(&mut self, other: Outcome<U>) -> U {
        self.warnings.extend(other.warnings);
        other.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn has_warning(&self, effect: SideEffect) -> bool {
        self.warnings.iter().any(|w| w.effect == effect)
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_carries_nested_warnings() {
        let mut outer = Outcome::clean(());
        let mut inner = Outcome::clean(7_u32);
        inner.push(SideEffectFailure::new(
            Path::new("/data/show"),
            SideEffect::Ownership,
            "chown failed",
        ));

        let value = outer.absorb(inner);

        assert_eq!(value, 7);
        assert!(!outer.is_clean());
        assert!(outer.has_warning(SideEffect::Ownership));
        assert!(!outer.has_warning(SideEffect::Watermark));
    }
}
