use std::borrow::Cow;

/// A label value that is safe to export (bounded cardinality).
#[derive(Clone, Debug)]
pub struct BoundedLabel(Cow<'static, str>);

impl BoundedLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Policy for turning a drop/failure reason into a bounded label. Every
/// reason used by this gateway is a fixed `&'static str` known at compile
/// time, so the policy just passes it through — but it keeps the seam where
/// a future caller could bucket something genuinely unbounded without
/// widening the exported label cardinality by accident.
#[derive(Clone, Debug, Default)]
pub struct LabelPolicy;

impl LabelPolicy {
    pub fn reason(&self, reason: &'static str) -> BoundedLabel {
        BoundedLabel(Cow::Borrowed(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_label_passes_through() {
        let policy = LabelPolicy;
        assert_eq!(policy.reason("malformed").as_str(), "malformed");
    }
}
