//! Document text templates for the packaging stage.
//!
//! Each document is a short line-oriented rendering of one entity, built for
//! embedding into the vector store. Empty optional lines are dropped.

/// Render a field document.
pub fn render_field_doc(
    label: &str,
    model: &str,
    field_name: &str,
    model_table: &str,
    ttype: &str,
    notes: &str,
) -> String {
    let mut lines = vec![
        format!("Field: {} ({}.{})", label, model, field_name),
        format!("Type: {}", ttype),
    ];
    if !notes.trim().is_empty() {
        lines.push(format!("Description: {}", notes));
    }
    lines.push(format!("Model: {} / {}", model, model_table));
    lines.join("\n")
}

/// Render a view document.
pub fn render_view_doc(
    action_display: &str,
    purpose: &str,
    help: &str,
    model: &str,
    model_table: &str,
    primary_view_type: Option<&str>,
) -> String {
    let lines = vec![
        format!("Screen: {}", action_display),
        format!("Purpose: {}", purpose),
        format!("Usage: {}", help),
        format!(
            "Model: {} / {} / primary view={}",
            model,
            model_table,
            primary_view_type.unwrap_or("")
        ),
    ];
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_doc_full() {
        let doc = render_field_doc(
            "Total Amount",
            "sale.order",
            "amount_total",
            "sale_order",
            "monetary",
            "Tax-included total",
        );
        assert_eq!(
            doc,
            "Field: Total Amount (sale.order.amount_total)\n\
             Type: monetary\n\
             Description: Tax-included total\n\
             Model: sale.order / sale_order"
        );
    }

    #[test]
    fn test_field_doc_without_notes() {
        let doc = render_field_doc("Customer", "sale.order", "partner_id", "sale_order", "many2one", "");
        assert!(!doc.contains("Description:"));
        assert_eq!(doc.lines().count(), 3);
    }

    #[test]
    fn test_view_doc() {
        let doc = render_view_doc(
            "Sales Orders",
            "Browse and edit orders",
            "Manage quotations and orders",
            "sale.order",
            "sale_order",
            Some("list"),
        );
        assert_eq!(
            doc,
            "Screen: Sales Orders\n\
             Purpose: Browse and edit orders\n\
             Usage: Manage quotations and orders\n\
             Model: sale.order / sale_order / primary view=list"
        );
    }

    #[test]
    fn test_view_doc_without_primary() {
        let doc = render_view_doc("Screen", "p", "h", "m", "t", None);
        assert!(doc.ends_with("primary view="));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let a = render_field_doc("L", "m", "f", "t", "char", "n");
        let b = render_field_doc("L", "m", "f", "t", "char", "n");
        assert_eq!(a, b);
    }
}
