//! Tenant Gate (SPEC_FULL §4.1).
//!
//! Deliberately transport-agnostic: `billing-api` extracts the three raw
//! inputs (path/body/query `app_id`, an optional authorized `app_id` from
//! the auth context, and the raw request body) and hands them here. The
//! gate is the only place that decides which `app_id` is trusted; callers
//! downstream never look at a body-level `app_id` again.

use crate::error::{Error, Result};

/// The substrings a payload scanner rejects before any domain logic runs
/// (SPEC_FULL §4.1). Raw cardholder data has no business being in a
/// request to this service — payment instruments are always tokenized
/// by the processor's hosted fields.
const PCI_FORBIDDEN_SUBSTRINGS: [&str; 5] = [
    "card_number",
    "cvv",
    "cvc",
    "account_number",
    "routing_number",
];

/// Verified tenant identity. The only `app_id` domain code should ever see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTenant {
    pub app_id: String,
}

/// Extracts and verifies the request's tenant per SPEC_FULL §4.1:
/// - an authorized `app_id` that doesn't match the requested one -> Forbidden
/// - an authorized context with no `app_id` at all -> Unauthorized
/// - no requested `app_id` anywhere -> Validation
pub fn verify_tenant(
    requested_app_id: Option<&str>,
    authorized_app_id: Option<&str>,
) -> Result<VerifiedTenant> {
    match (requested_app_id, authorized_app_id) {
        (Some(requested), Some(authorized)) => {
            if requested == authorized {
                Ok(VerifiedTenant {
                    app_id: requested.to_string(),
                })
            } else {
                Err(Error::forbidden("app_id does not match authorized tenant"))
            }
        }
        (Some(_), None) => Err(Error::unauthorized("Missing authorized tenant context")),
        (None, _) => Err(Error::validation("Missing app_id")),
    }
}

/// Picks the first present `app_id` per SPEC_FULL §6: `path.app_id |
/// body.app_id | query.app_id`. This is the *requested* value only —
/// it still has to pass through `verify_tenant` before it's trusted.
pub fn pick_requested_app_id<'a>(
    path: Option<&'a str>,
    body: Option<&'a str>,
    query: Option<&'a str>,
) -> Option<&'a str> {
    path.or(body).or(query)
}

/// Rejects any request whose serialized body contains a PCI-sensitive
/// field name, per SPEC_FULL §4.1. Runs before domain logic, on the raw
/// serialized body so it catches the field regardless of nesting depth.
pub fn scan_for_pci_violation(serialized_body: &str) -> Result<()> {
    let lowered = serialized_body.to_lowercase();
    for needle in PCI_FORBIDDEN_SUBSTRINGS {
        if lowered.contains(needle) {
            return Err(Error::validation("PCI violation"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_app_ids_verify() {
        let tenant = verify_tenant(Some("tenant-a"), Some("tenant-a")).unwrap();
        assert_eq!(tenant.app_id, "tenant-a");
    }

    #[test]
    fn mismatched_app_ids_are_forbidden() {
        let err = verify_tenant(Some("tenant-a"), Some("tenant-b")).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn missing_authorized_context_is_unauthorized() {
        let err = verify_tenant(Some("tenant-a"), None).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn missing_requested_app_id_is_validation_error() {
        let err = verify_tenant(None, Some("tenant-a")).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn pci_scanner_rejects_card_number_field() {
        let body = r#"{"payment":{"card_number":"4242424242424242"}}"#;
        let err = scan_for_pci_violation(body).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn pci_scanner_rejects_case_insensitively() {
        let body = r#"{"CVV":"123"}"#;
        assert!(scan_for_pci_violation(body).is_err());
    }

    #[test]
    fn pci_scanner_allows_clean_payload() {
        let body = r#"{"payment_method_id":"pm_123","amount_cents":500}"#;
        assert!(scan_for_pci_violation(body).is_ok());
    }

    #[test]
    fn requested_app_id_prefers_path_then_body_then_query() {
        assert_eq!(
            pick_requested_app_id(Some("p"), Some("b"), Some("q")),
            Some("p")
        );
        assert_eq!(pick_requested_app_id(None, Some("b"), Some("q")), Some("b"));
        assert_eq!(pick_requested_app_id(None, None, Some("q")), Some("q"));
        assert_eq!(pick_requested_app_id(None, None, None), None);
    }
}
