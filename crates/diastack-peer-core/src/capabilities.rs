use crate::types::LocalIdentity;
use diastack_core::FramedAvp;
use diastack_message::avp::{self, read_u32};
use diastack_message::*;
use std::collections::BTreeSet;

fn capability_avps(local: &LocalIdentity) -> Vec<FramedAvp> {
    let mut avps = Vec::new();
    for ip in &local.host_ip_addresses {
        avps.push(avp::address(AVP_HOST_IP_ADDRESS, *ip).mandatory());
    }
    avps.push(avp::unsigned32(AVP_VENDOR_ID, local.vendor_id).mandatory());
    avps.push(avp::text(AVP_PRODUCT_NAME, &local.product_name));
    avps.push(avp::unsigned32(AVP_ORIGIN_STATE_ID, local.origin_state_id).mandatory());
    for id in &local.auth_application_ids {
        avps.push(avp::unsigned32(AVP_AUTH_APPLICATION_ID, *id).mandatory());
    }
    for id in &local.acct_application_ids {
        avps.push(avp::unsigned32(AVP_ACCT_APPLICATION_ID, *id).mandatory());
    }
    avps
}

fn stamp(builder: MessageBuilder, local: &LocalIdentity) -> MessageBuilder {
    builder.origin_host(&local.host).origin_realm(&local.realm)
}

/// Base-protocol answers carry no destination identities
fn base_answer(request: &DiameterMessage, result_code: u32, local: &LocalIdentity) -> MessageBuilder {
    stamp(
        request
            .create_answer(result_code)
            .remove_avp(AVP_DESTINATION_HOST)
            .remove_avp(AVP_DESTINATION_REALM),
        local,
    )
}

pub fn cer(local: &LocalIdentity, ids: &IdGenerator) -> DiameterMessage {
    stamp(DiameterMessage::request(CMD_CAPABILITIES_EXCHANGE, APP_COMMON, ids), local)
        .avps(capability_avps(local))
        .build()
}

pub fn cea(request: &DiameterMessage, result_code: u32, local: &LocalIdentity) -> DiameterMessage {
    base_answer(request, result_code, local)
        .avps(capability_avps(local))
        .build()
}

pub fn dwr(local: &LocalIdentity, ids: &IdGenerator) -> DiameterMessage {
    stamp(DiameterMessage::request(CMD_DEVICE_WATCHDOG, APP_COMMON, ids), local)
        .avp(avp::unsigned32(AVP_ORIGIN_STATE_ID, local.origin_state_id).mandatory())
        .build()
}

pub fn dwa(request: &DiameterMessage, local: &LocalIdentity) -> DiameterMessage {
    base_answer(request, RESULT_CODE_SUCCESS, local)
        .avp(avp::unsigned32(AVP_ORIGIN_STATE_ID, local.origin_state_id).mandatory())
        .build()
}

pub fn dpr(local: &LocalIdentity, cause: u32, ids: &IdGenerator) -> DiameterMessage {
    stamp(DiameterMessage::request(CMD_DISCONNECT_PEER, APP_COMMON, ids), local)
        .avp(avp::unsigned32(AVP_DISCONNECT_CAUSE, cause).mandatory())
        .build()
}

pub fn dpa(request: &DiameterMessage, local: &LocalIdentity) -> DiameterMessage {
    base_answer(request, RESULT_CODE_SUCCESS, local).build()
}

/// Application ids a CER/CEA advertises, including those inside
/// Vendor-Specific-Application-Id
pub fn advertised_applications(message: &DiameterMessage) -> BTreeSet<u32> {
    let mut ids: BTreeSet<u32> = message
        .avps()
        .iter()
        .filter(|a| a.code == AVP_AUTH_APPLICATION_ID || a.code == AVP_ACCT_APPLICATION_ID)
        .filter_map(read_u32)
        .collect();

    for vsai in message.avps_with(AVP_VENDOR_SPECIFIC_APPLICATION_ID) {
        let Ok(children) = vsai.children() else {
            continue;
        };
        ids.extend(
            children
                .iter()
                .filter(|a| a.code == AVP_AUTH_APPLICATION_ID || a.code == AVP_ACCT_APPLICATION_ID)
                .filter_map(read_u32),
        );
    }
    ids
}

/// True when both sides share an application; the relay id matches all
pub fn has_common_application(local: &LocalIdentity, remote: &BTreeSet<u32>) -> bool {
    let mine: BTreeSet<u32> = local
        .auth_application_ids
        .iter()
        .chain(&local.acct_application_ids)
        .copied()
        .collect();

    if mine.contains(&APP_RELAY) || remote.contains(&APP_RELAY) {
        return true;
    }
    !mine.is_disjoint(remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn local(apps: Vec<u32>) -> LocalIdentity {
        LocalIdentity {
            host: "dra.example.com".to_string(),
            realm: "example.com".to_string(),
            host_ip_addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))],
            vendor_id: 0,
            product_name: "diastack".to_string(),
            origin_state_id: 5,
            auth_application_ids: apps,
            acct_application_ids: vec![],
        }
    }

    #[test]
    fn test_cer_content() {
        let msg = cer(&local(vec![16777251]), &IdGenerator::with_seed(0, 0, 0));
        assert!(msg.is_cer());
        assert_eq!(msg.application_id(), APP_COMMON);
        assert_eq!(msg.origin_host().unwrap(), "dra.example.com");
        assert!(msg.avp(AVP_HOST_IP_ADDRESS).is_some());
        assert_eq!(msg.unsigned32(AVP_ORIGIN_STATE_ID), Some(5));
        assert_eq!(advertised_applications(&msg), BTreeSet::from([16777251]));
    }

    #[test]
    fn test_cea_has_no_destination() {
        let ids = IdGenerator::with_seed(0, 0, 0);
        let request = cer(&local(vec![4]), &ids);
        let answer = cea(&request, RESULT_CODE_SUCCESS, &local(vec![4]));

        assert!(answer.is_cea());
        assert_eq!(answer.hop_by_hop_id(), request.hop_by_hop_id());
        assert_eq!(answer.destination_host(), None);
        assert_eq!(answer.result_code(), Some(RESULT_CODE_SUCCESS));
        assert_eq!(answer.avps_with(AVP_ORIGIN_HOST).count(), 1);
    }

    #[test]
    fn test_vendor_specific_applications_are_advertised() {
        let ids = IdGenerator::with_seed(0, 0, 0);
        let msg = DiameterMessage::request(CMD_CAPABILITIES_EXCHANGE, APP_COMMON, &ids)
            .avp(FramedAvp::grouped(
                AVP_VENDOR_SPECIFIC_APPLICATION_ID,
                &[
                    avp::unsigned32(AVP_VENDOR_ID, 10415),
                    avp::unsigned32(AVP_AUTH_APPLICATION_ID, 16777251),
                ],
            ))
            .avp(avp::unsigned32(AVP_ACCT_APPLICATION_ID, 3))
            .build();

        assert_eq!(advertised_applications(&msg), BTreeSet::from([3, 16777251]));
    }

    #[test]
    fn test_common_application() {
        assert!(has_common_application(&local(vec![4, 16777251]), &BTreeSet::from([16777251])));
        assert!(!has_common_application(&local(vec![4]), &BTreeSet::from([16777251])));
        assert!(has_common_application(&local(vec![APP_RELAY]), &BTreeSet::from([16777251])));
        assert!(has_common_application(&local(vec![4]), &BTreeSet::from([APP_RELAY])));
        assert!(!has_common_application(&local(vec![]), &BTreeSet::new()));
    }

    #[test]
    fn test_dpr_and_dwr() {
        let ids = IdGenerator::with_seed(0, 0, 0);
        let request = dpr(&local(vec![]), DISCONNECT_CAUSE_BUSY, &ids);
        assert!(request.is_dpr());
        assert_eq!(request.unsigned32(AVP_DISCONNECT_CAUSE), Some(DISCONNECT_CAUSE_BUSY));
        assert!(dpa(&request, &local(vec![])).is_dpa());

        let watchdog = dwr(&local(vec![]), &ids);
        assert!(watchdog.is_dwr());
        assert!(dwa(&watchdog, &local(vec![])).is_dwa());
    }
}
