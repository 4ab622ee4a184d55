//! Which delivery spec, if any, applies to a message unit

use parley_common::{
    MessageUnit, UnitKind,
    pmode::{DeliverySpec, ErrorHandling, PMode, PolicySet, ReceiptConfig},
};

/// Resolve the delivery spec for `unit` under `pmode`
///
/// - User messages use the leg's default delivery.
/// - Receipts are delivered only if the leg asks for receipt notification,
///   with the receipt delivery or else the leg default.
/// - Errors are delivered only if the error handling of the flow they concern
///   asks for notification, with the error delivery or else the leg default.
///   An error concerns the pull-request flow when its leg is the P-Mode's
///   pulled leg, and the user-message flow otherwise.
/// - Pull requests are never delivered.
///
/// `None` means the unit needs no delivery.
pub fn resolve_delivery_spec<'p>(
    unit: &MessageUnit,
    pmode: &'p PMode,
    policies: &dyn PolicySet,
) -> Option<&'p DeliverySpec> {
    let leg = pmode.leg_for(unit.leg())?;
    let default = leg.default_delivery.as_ref();

    match unit.kind() {
        UnitKind::UserMessage(_) => default,
        UnitKind::Receipt(_) => leg
            .receipt
            .as_ref()
            .filter(|receipt| receipt.notify_receipts_to_business_application)
            .and_then(|ReceiptConfig { receipt_delivery, .. }| {
                receipt_delivery.as_ref().or(default)
            }),
        UnitKind::ErrorSignal(_) => {
            let concerns_pull =
                unit.leg().is_some() && unit.leg() == policies.pull_leg_of(pmode);
            let handling = if concerns_pull {
                leg.pull_error_handling()
            } else {
                leg.user_message_error_handling()
            };

            handling
                .filter(|handling| handling.notify_errors_to_business_application)
                .and_then(|ErrorHandling { error_delivery, .. }| {
                    error_delivery.as_ref().or(default)
                })
        }
        UnitKind::PullRequest(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use parley_common::{
        message::{ErrorSignal, PullRequest, Receipt, UserMessage},
        pmode::{Flow, Label, Leg, MemoryPolicySet, MepBinding},
    };
    use pretty_assertions::assert_eq;

    use super::*;

    fn spec(id: &str) -> DeliverySpec {
        DeliverySpec::new(Some(id), "file")
    }

    fn notify_errors(delivery: Option<DeliverySpec>) -> Flow {
        Flow {
            mpc: None,
            error_handling: Some(ErrorHandling {
                notify_errors_to_business_application: true,
                error_delivery: delivery,
            }),
        }
    }

    fn resolved(unit: &MessageUnit, pmode: &PMode) -> Option<String> {
        resolve_delivery_spec(unit, pmode, &MemoryPolicySet::new())
            .and_then(|spec| spec.id.clone())
    }

    #[test]
    fn test_user_message_uses_leg_default() {
        let mut leg = Leg::new(Label::Request);
        leg.default_delivery = Some(spec("default"));
        let pmode = PMode::new("pm", MepBinding::Push).with_leg(leg);

        let unit = MessageUnit::user_message(UserMessage::default());
        assert_eq!(resolved(&unit, &pmode).as_deref(), Some("default"));

        let without_legs = PMode::new("empty", MepBinding::Push);
        assert_eq!(resolved(&unit, &without_legs), None);
    }

    #[test]
    fn test_receipts_only_when_notification_requested() {
        let mut leg = Leg::new(Label::Request);
        leg.default_delivery = Some(spec("default"));
        leg.receipt = Some(ReceiptConfig {
            notify_receipts_to_business_application: false,
            receipt_delivery: Some(spec("receipts")),
        });
        let silent = PMode::new("pm", MepBinding::Push).with_leg(leg.clone());

        let unit = MessageUnit::receipt(Receipt::default());
        assert_eq!(resolved(&unit, &silent), None);

        leg.receipt = Some(ReceiptConfig {
            notify_receipts_to_business_application: true,
            receipt_delivery: Some(spec("receipts")),
        });
        let specific = PMode::new("pm", MepBinding::Push).with_leg(leg.clone());
        assert_eq!(resolved(&unit, &specific).as_deref(), Some("receipts"));

        leg.receipt = Some(ReceiptConfig {
            notify_receipts_to_business_application: true,
            receipt_delivery: None,
        });
        let fallback = PMode::new("pm", MepBinding::Push).with_leg(leg);
        assert_eq!(resolved(&unit, &fallback).as_deref(), Some("default"));
    }

    #[test]
    fn test_errors_pick_flow_by_pull_leg() {
        let mut leg = Leg::new(Label::Request);
        leg.default_delivery = Some(spec("default"));
        leg.user_message_flow = Some(notify_errors(Some(spec("um-errors"))));
        leg.pull_request_flows = vec![notify_errors(None)];

        let pulled = PMode::new("pm", MepBinding::Pull).with_leg(leg.clone());
        let pushed = PMode::new("pm", MepBinding::Push).with_leg(leg);

        let on_request = MessageUnit::error_signal(ErrorSignal::default()).with_leg(Label::Request);
        assert_eq!(resolved(&on_request, &pulled).as_deref(), Some("default"));
        assert_eq!(resolved(&on_request, &pushed).as_deref(), Some("um-errors"));

        let unlabelled = MessageUnit::error_signal(ErrorSignal::default());
        assert_eq!(resolved(&unlabelled, &pulled).as_deref(), Some("um-errors"));
    }

    #[test]
    fn test_errors_without_notification() {
        let mut leg = Leg::new(Label::Request);
        leg.default_delivery = Some(spec("default"));
        let pmode = PMode::new("pm", MepBinding::Push).with_leg(leg);

        let unit = MessageUnit::error_signal(ErrorSignal::default());
        assert_eq!(resolved(&unit, &pmode), None);
    }

    #[test]
    fn test_pull_requests_are_never_delivered() {
        let mut leg = Leg::new(Label::Request);
        leg.default_delivery = Some(spec("default"));
        let pmode = PMode::new("pm", MepBinding::Pull).with_leg(leg);

        let unit = MessageUnit::pull_request(PullRequest::new("urn:mpc"));
        assert_eq!(resolved(&unit, &pmode), None);
    }
}
