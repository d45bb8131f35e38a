use crate::avp;
use crate::constants::*;
use crate::ids::IdGenerator;
use crate::message::DiameterMessage;
use diastack_core::codec::{DIAMETER_VERSION, FLAG_ERROR, FLAG_PROXIABLE, FLAG_REQUEST};
use diastack_core::{DiameterHeader, FramedAvp};

/// Assembles a [`DiameterMessage`]; AVPs keep the order they are added in
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    header: DiameterHeader,
    avps: Vec<FramedAvp>,
}

impl MessageBuilder {
    pub fn request(command_code: u32, application_id: u32, ids: &IdGenerator) -> Self {
        Self {
            header: DiameterHeader {
                version: DIAMETER_VERSION,
                length: 0,
                flags: FLAG_REQUEST,
                command_code,
                application_id,
                hop_by_hop_id: ids.next_hop_by_hop(),
                end_to_end_id: ids.next_end_to_end(),
            },
            avps: Vec::new(),
        }
    }

    /// Answer skeleton for `request`.
    ///
    /// Echoes both ids and the Proxiable bit, copies Session-Id, swaps
    /// the origin and destination identities and appends Result-Code.
    /// 3xxx result codes set the Error bit.
    pub fn answer_to(request: &DiameterMessage, result_code: u32) -> Self {
        let req = request.header();
        let mut flags = req.flags & FLAG_PROXIABLE;
        if is_protocol_error(result_code) {
            flags |= FLAG_ERROR;
        }

        let mut avps = Vec::new();
        avps.extend(request.avp(AVP_SESSION_ID).cloned());
        for (from, to) in [
            (AVP_DESTINATION_HOST, AVP_ORIGIN_HOST),
            (AVP_DESTINATION_REALM, AVP_ORIGIN_REALM),
            (AVP_ORIGIN_HOST, AVP_DESTINATION_HOST),
            (AVP_ORIGIN_REALM, AVP_DESTINATION_REALM),
        ] {
            if let Some(avp) = request.avp(from) {
                avps.push(FramedAvp {
                    code: to,
                    ..avp.clone()
                });
            }
        }
        avps.push(avp::unsigned32(AVP_RESULT_CODE, result_code).mandatory());

        Self {
            header: DiameterHeader {
                version: DIAMETER_VERSION,
                length: 0,
                flags,
                command_code: req.command_code,
                application_id: req.application_id,
                hop_by_hop_id: req.hop_by_hop_id,
                end_to_end_id: req.end_to_end_id,
            },
            avps,
        }
    }

    pub fn proxiable(mut self) -> Self {
        self.header.flags |= FLAG_PROXIABLE;
        self
    }

    pub fn error(mut self) -> Self {
        self.header.flags |= FLAG_ERROR;
        self
    }

    pub fn application_id(mut self, application_id: u32) -> Self {
        self.header.application_id = application_id;
        self
    }

    /// Append an AVP
    pub fn avp(mut self, avp: FramedAvp) -> Self {
        self.avps.push(avp);
        self
    }

    pub fn avps(mut self, avps: impl IntoIterator<Item = FramedAvp>) -> Self {
        self.avps.extend(avps);
        self
    }

    /// Replace the first AVP with the same code, or append
    pub fn set_avp(mut self, avp: FramedAvp) -> Self {
        match self.avps.iter_mut().find(|a| a.code == avp.code) {
            Some(existing) => *existing = avp,
            None => self.avps.push(avp),
        }
        self
    }

    /// Drop every AVP with this code
    pub fn remove_avp(mut self, code: u32) -> Self {
        self.avps.retain(|a| a.code != code);
        self
    }

    pub fn session_id(self, session_id: &str) -> Self {
        self.set_avp(avp::text(AVP_SESSION_ID, session_id).mandatory())
    }

    pub fn origin_host(self, host: &str) -> Self {
        self.set_avp(avp::text(AVP_ORIGIN_HOST, host).mandatory())
    }

    pub fn origin_realm(self, realm: &str) -> Self {
        self.set_avp(avp::text(AVP_ORIGIN_REALM, realm).mandatory())
    }

    pub fn destination_host(self, host: &str) -> Self {
        self.set_avp(avp::text(AVP_DESTINATION_HOST, host).mandatory())
    }

    pub fn destination_realm(self, realm: &str) -> Self {
        self.set_avp(avp::text(AVP_DESTINATION_REALM, realm).mandatory())
    }

    pub fn build(self) -> DiameterMessage {
        DiameterMessage::from_parts(self.header, self.avps)
    }
}
