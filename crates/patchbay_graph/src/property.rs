// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed node properties and their widget hints.

use serde::{Deserialize, Serialize};

/// Value carried by a node property.
///
/// Properties are a closed sum rather than an open `Any` map so that
/// commands can capture and restore old values without downcasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Free-form text
    Text(String),
    /// Floating point number
    Number(f64),
    /// On/off flag
    Bool(bool),
    /// RGBA color
    Color([u8; 4]),
    /// One choice out of the widget's item list
    Choice(String),
    /// Fixed-arity numeric vector
    Vector(Vec<f64>),
}

impl PropertyValue {
    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Choice(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content, if this is a number value.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Flag content, if this is a bool value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Widget used to edit a property in a property panel.
///
/// The core never draws widgets; the hint travels with the property so a
/// view can pick the right editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidgetKind {
    /// Hidden from panels (internal state)
    Hidden,
    /// Read-only text display
    Label,
    /// Single-line text box
    LineEdit,
    /// Multi-line text box
    TextEdit,
    /// Checkbox
    CheckBox,
    /// Integer-stepping spin box
    SpinBox,
    /// Floating point spin box
    DoubleSpinBox,
    /// Drop-down list over items
    ComboBox,
    /// Color picker
    ColorPicker,
    /// Slider over a range
    Slider,
    /// Vector of numeric fields
    Vector,
}

/// Display metadata for a property, without its value.
///
/// Used for type-wide defaults registered on the graph (every node of a
/// type shares the same widget, tab, items and range).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMeta {
    /// Editing widget
    pub widget: WidgetKind,
    /// Panel tab the property is grouped under
    pub tab: String,
    /// Items for choice widgets
    pub items: Vec<String>,
    /// Inclusive min/max for numeric widgets
    pub range: Option<[f64; 2]>,
}

impl Default for PropertyMeta {
    fn default() -> Self {
        Self {
            widget: WidgetKind::Hidden,
            tab: "Properties".to_string(),
            items: Vec::new(),
            range: None,
        }
    }
}

/// A custom property on a node: a value plus its display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Current value
    pub value: PropertyValue,
    /// Display metadata
    pub meta: PropertyMeta,
}

impl Property {
    /// Create a property with a value and default (hidden) metadata.
    pub fn new(value: PropertyValue) -> Self {
        Self {
            value,
            meta: PropertyMeta::default(),
        }
    }

    /// Text property edited with a line edit.
    pub fn text(value: impl Into<String>) -> Self {
        Self::new(PropertyValue::Text(value.into())).with_widget(WidgetKind::LineEdit)
    }

    /// Number property edited with a floating point spin box.
    pub fn number(value: f64) -> Self {
        Self::new(PropertyValue::Number(value)).with_widget(WidgetKind::DoubleSpinBox)
    }

    /// Bool property edited with a checkbox.
    pub fn flag(value: bool) -> Self {
        Self::new(PropertyValue::Bool(value)).with_widget(WidgetKind::CheckBox)
    }

    /// Color property edited with a color picker.
    pub fn color(value: [u8; 4]) -> Self {
        Self::new(PropertyValue::Color(value)).with_widget(WidgetKind::ColorPicker)
    }

    /// Choice property edited with a combo box over `items`.
    pub fn choice(value: impl Into<String>, items: Vec<String>) -> Self {
        Self::new(PropertyValue::Choice(value.into()))
            .with_widget(WidgetKind::ComboBox)
            .with_items(items)
    }

    /// Vector property edited with per-component numeric fields.
    pub fn vector(values: Vec<f64>) -> Self {
        Self::new(PropertyValue::Vector(values)).with_widget(WidgetKind::Vector)
    }

    /// Set the editing widget.
    pub fn with_widget(mut self, widget: WidgetKind) -> Self {
        self.meta.widget = widget;
        self
    }

    /// Set the panel tab.
    pub fn with_tab(mut self, tab: impl Into<String>) -> Self {
        self.meta.tab = tab.into();
        self
    }

    /// Set the item list for choice widgets.
    pub fn with_items(mut self, items: Vec<String>) -> Self {
        self.meta.items = items;
        self
    }

    /// Set the numeric range.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.meta.range = Some([min, max]);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_builders() {
        let p = Property::number(0.5).with_range(0.0, 1.0).with_tab("Mix");
        assert_eq!(p.value.as_number(), Some(0.5));
        assert_eq!(p.meta.widget, WidgetKind::DoubleSpinBox);
        assert_eq!(p.meta.range, Some([0.0, 1.0]));
        assert_eq!(p.meta.tab, "Mix");
    }

    #[test]
    fn test_choice_items() {
        let p = Property::choice("linear", vec!["linear".into(), "smooth".into()]);
        assert_eq!(p.value.as_text(), Some("linear"));
        assert_eq!(p.meta.items.len(), 2);
    }

    #[test]
    fn test_widget_hints_survive_serde() {
        let offset = Property::vector(vec![0.0, 0.0, 1.0]);
        assert_eq!(offset.meta.widget, WidgetKind::Vector);

        // Hints only a view cares about still travel with the value.
        let status = Property::text("ready").with_widget(WidgetKind::Label);
        for prop in [offset, status] {
            let json = serde_json::to_string(&prop).unwrap();
            let back: Property = serde_json::from_str(&json).unwrap();
            assert_eq!(back, prop);
        }
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(PropertyValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::Text("x".into()).as_number(), None);
    }
}
