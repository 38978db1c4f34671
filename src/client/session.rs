//! The protocol core of a client session.
//!
//! [`DlmsSession`] knows how to build every request and how to interpret
//! every response, but never touches a transport. Multi-step exchanges
//! (block transfers) are driven by the caller, which feeds each response
//! back in and sends whatever the session asks for next.

use log::debug;
use nom::{Parser, multi::length_count};

use crate::action::{ActionRequest, ActionRequestNormal, ActionResponse, ActionResponseWithOptionalData, ActionResult};
use crate::apdu::Apdu;
use crate::association::{
    AareApdu, AarqApdu, AcseServiceUserDiagnostics, ApplicationContextName, Authentication, Conformance,
    InitiateRequest, RlrqApdu, UserInformation,
};
use crate::cipher::{self, ENVELOPE_OVERHEAD, Envelope, KeyKind};
use crate::client::ClientState;
use crate::data::{Data, parse_count};
use crate::descriptor::{
    AttributeDescriptor, AttributeWithSelection, MethodDescriptor, SelectiveAccessDescriptor,
    encode_access_selection,
};
use crate::error::{CodecError, Error, Result};
use crate::exception::ExceptionResponse;
use crate::get::{
    DataAccessResult, DataBlockG, DataBlockResult, GetDataResult, GetRequest, GetRequestNext, GetRequestNormal,
    GetRequestWithList, GetResponse,
};
use crate::set::{
    DataBlockSa, SetRequest, SetRequestNormal, SetRequestWithDataBlock, SetRequestWithFirstDataBlock, SetResponse,
};
use crate::settings::{Ciphering, MIN_PDU_SIZE, Settings};

const INVOKE_ID_PRIORITY_HIGH: u8 = 0x80;
const INVOKE_ID_CONFIRMED: u8 = 0x40;
const INVOKE_ID_MASK: u8 = 0x0F;

/// Worst-case BER length field of an envelope.
const ENVELOPE_LENGTH_FIELD: usize = 3;
/// Worst-case BER length field in front of a block's raw data.
const BLOCK_LENGTH_FIELD: usize = 3;
/// `<tag> <choice> <invoke id>`
const SERVICE_HEADER: usize = 3;
/// `<last> <block number>`
const BLOCK_HEADER: usize = 5;

/// Collects the raw payload of numbered blocks.
///
/// Blocks must arrive numbered 1, 2, 3, ... without gaps; any other number
/// aborts the transfer and discards what was collected.
#[derive(Debug)]
pub struct BlockReassembly {
    expected: u32,
    buffer: Vec<u8>,
}

impl Default for BlockReassembly {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockReassembly {
    pub fn new() -> Self {
        Self { expected: 1, buffer: Vec::new() }
    }

    /// Returns the complete payload once the last block is pushed.
    pub fn push(&mut self, block_number: u32, last_block: bool, raw: &[u8]) -> Result<Option<Vec<u8>>> {
        if block_number != self.expected {
            let expected = self.expected;
            *self = Self::new();
            return Err(Error::InvalidResponse(format!("received block {block_number}, expected {expected}")));
        }
        self.buffer.extend_from_slice(raw);
        if last_block {
            let complete = core::mem::take(&mut self.buffer);
            *self = Self::new();
            return Ok(Some(complete));
        }
        self.expected = self
            .expected
            .checked_add(1)
            .ok_or_else(|| Error::InvalidResponse("block number overflow".into()))?;
        Ok(None)
    }

    pub fn received_len(&self) -> usize {
        self.buffer.len()
    }
}

/// What a Get exchange needs next.
#[derive(Debug, Clone, PartialEq)]
pub enum GetProgress<T> {
    Complete(T),
    /// Send this request and feed its response back in.
    Next(GetRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetProgress {
    /// A non-final block was acknowledged; send the next one.
    Acknowledged,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionProgress {
    /// A non-final parameter block was acknowledged; send the next one.
    Acknowledged,
    /// Send this request and feed its response back in.
    Next(ActionRequest),
    Complete(Option<Data>),
}

fn decode_value(raw: &[u8]) -> Result<Data> {
    let (data, consumed) = Data::decode(raw)?;
    match raw.len() - consumed {
        0 => Ok(data),
        n => Err(Error::Codec(CodecError::TrailingBytes(n))),
    }
}

fn check_invoke_id(received: u8, expected: u8) -> Result<()> {
    if received != expected {
        return Err(Error::CheckDoesNotMatch(format!("invoke id 0x{received:02X}, expected 0x{expected:02X}")));
    }
    Ok(())
}

fn unexpected(apdu: &Apdu) -> Error {
    match apdu {
        Apdu::ExceptionResponse(exception) => Error::InvalidResponse(format!("exception response: {exception}")),
        Apdu::ConfirmedServiceError(error) => Error::InvalidResponse(format!("confirmed service error: {error}")),
        other => Error::InvalidResponse(format!("unexpected {}", other.name())),
    }
}

fn set_result(result: DataAccessResult) -> Result<SetProgress> {
    match result {
        DataAccessResult::Success => Ok(SetProgress::Complete),
        rejected => Err(Error::SetRejected(rejected)),
    }
}

fn action_result(response: ActionResponseWithOptionalData) -> Result<ActionProgress> {
    match (response.result, response.return_parameters) {
        (ActionResult::Success, None) => Ok(ActionProgress::Complete(None)),
        (ActionResult::Success, Some(GetDataResult::Data(data))) => Ok(ActionProgress::Complete(Some(data))),
        (ActionResult::Success, Some(GetDataResult::DataAccessError(_))) => {
            Err(Error::ActionRejected(ActionResult::OtherReason))
        }
        (rejected, _) => Err(Error::ActionRejected(rejected)),
    }
}

#[derive(Debug)]
pub struct DlmsSession {
    settings: Settings,
    state: ClientState,
    invoke_counter: u8,
    max_pdu_send: u16,
    negotiated_conformance: Option<Conformance>,
    server_max_receive_pdu_size: Option<u16>,
}

impl DlmsSession {
    pub fn new(settings: Settings) -> Self {
        let max_pdu_send = settings.max_pdu_send;
        Self {
            settings,
            state: ClientState::Disconnected,
            invoke_counter: 0,
            max_pdu_send,
            negotiated_conformance: None,
            server_max_receive_pdu_size: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current keys and invocation counters, for the caller to persist.
    pub fn ciphering(&self) -> Option<&Ciphering> {
        self.settings.ciphering.as_ref()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Largest APDU that may be sent, after association clamped by the server.
    pub fn max_pdu_send(&self) -> u16 {
        self.max_pdu_send
    }

    pub fn negotiated_conformance(&self) -> Option<Conformance> {
        self.negotiated_conformance
    }

    pub fn server_max_receive_pdu_size(&self) -> Option<u16> {
        self.server_max_receive_pdu_size
    }

    pub fn require_state(&self, expected: ClientState) -> Result<()> {
        match self.state == expected {
            true => Ok(()),
            false => Err(Error::InvalidState(self.state)),
        }
    }

    pub fn connected(&mut self) {
        debug!("session connected");
        self.state = ClientState::Connected;
    }

    /// Forgets the association. The transport stays up.
    pub fn release(&mut self) {
        if self.state == ClientState::Associated {
            debug!("association released");
            self.state = ClientState::Connected;
        }
        self.max_pdu_send = self.settings.max_pdu_send;
        self.negotiated_conformance = None;
        self.server_max_receive_pdu_size = None;
        if let Some(ciphering) = self.settings.ciphering.as_mut() {
            ciphering.reset_dedicated();
        }
    }

    pub fn disconnected(&mut self) {
        self.release();
        if self.state != ClientState::Disconnected {
            debug!("session disconnected");
        }
        self.state = ClientState::Disconnected;
    }

    /// The next invoke-id-and-priority byte: a 4 bit counter with the
    /// high-priority and confirmed bits set.
    pub fn next_invoke_id(&mut self) -> u8 {
        let id = INVOKE_ID_PRIORITY_HIGH | INVOKE_ID_CONFIRMED | self.invoke_counter;
        self.invoke_counter = (self.invoke_counter + 1) & INVOKE_ID_MASK;
        id
    }

    fn initiate_request(&self) -> InitiateRequest {
        let mut request = InitiateRequest::new(self.settings.conformance, self.settings.max_pdu_receive);
        if let Some(ciphering) = &self.settings.ciphering {
            request.dedicated_key = ciphering.dedicated_key.map(|key| key.to_vec());
        }
        request
    }

    /// The InitiateRequest, sealed with the global key when ciphering.
    fn protected_initiate_request(&mut self) -> Result<Vec<u8>> {
        let request = self.initiate_request().encode();
        match self.settings.ciphering.as_mut() {
            Some(ciphering) => Ok(ciphering.seal(&request, KeyKind::Global)?),
            None => Ok(request),
        }
    }

    pub fn build_aarq(&mut self) -> Result<Vec<u8>> {
        let user_information = self.protected_initiate_request()?;
        let mut aarq =
            AarqApdu::new(ApplicationContextName::logical_name(self.settings.is_ciphered()), user_information);
        if let Some(ciphering) = &self.settings.ciphering {
            aarq.calling_ap_title = Some(ciphering.system_title.to_vec());
        }
        if self.settings.authentication != Authentication::None {
            aarq.authentication = self.settings.authentication;
            aarq.calling_authentication_value = self.settings.password.clone();
        }
        Ok(aarq.encode())
    }

    fn read_user_information(&mut self, bytes: &[u8]) -> Result<UserInformation> {
        match bytes.first() {
            Some(&tag) if cipher::is_ciphered_tag(tag) => {
                let ciphering = self
                    .settings
                    .ciphering
                    .as_mut()
                    .ok_or_else(|| Error::InvalidResponse("ciphered AARE without ciphering settings".into()))?;
                let envelope = Envelope::decode(bytes)?;
                let plain = ciphering.open(&envelope)?;
                Ok(UserInformation::decode(&plain)?)
            }
            _ => Ok(UserInformation::decode(bytes)?),
        }
    }

    /// Interprets the reply to an AARQ and enters the associated state on
    /// success.
    pub fn handle_aare(&mut self, frame: &[u8]) -> Result<()> {
        let aare = match AareApdu::parse(frame) {
            Ok(([], aare)) => aare,
            Ok((rest, _)) => return Err(Error::Codec(CodecError::TrailingBytes(rest.len()))),
            Err(err) => {
                if let Ok(exception) = ExceptionResponse::decode(frame) {
                    return Err(Error::AuthenticationFailed(format!("exception response: {exception}")));
                }
                return Err(Error::InvalidResponse(format!("expected AARE: {}", CodecError::from_nom(err))));
            }
        };

        if let (Some(ciphering), Some(title)) = (self.settings.ciphering.as_mut(), aare.responding_ap_title.as_deref()) {
            let title: [u8; 8] = title
                .try_into()
                .map_err(|_| Error::InvalidResponse(format!("responding AP title of {} bytes", title.len())))?;
            ciphering.peer_system_title = Some(title);
        }

        let information = aare.user_information.as_deref().map(|ui| self.read_user_information(ui)).transpose()?;
        if let Some(UserInformation::ConfirmedServiceError(error)) = information {
            return Err(Error::ServiceError(error));
        }
        if aare.result_source_diagnostic.user_diagnostic() == Some(AcseServiceUserDiagnostics::AuthenticationFailure) {
            return Err(Error::InvalidPassword);
        }

        match (aare.is_accepted(), information) {
            (true, Some(UserInformation::InitiateResponse(response))) => {
                if response.server_max_receive_pdu_size < MIN_PDU_SIZE {
                    return Err(Error::InvalidResponse(format!(
                        "server max receive PDU size {}",
                        response.server_max_receive_pdu_size
                    )));
                }
                self.max_pdu_send = self.settings.max_pdu_send.min(response.server_max_receive_pdu_size);
                self.server_max_receive_pdu_size = Some(response.server_max_receive_pdu_size);
                self.negotiated_conformance = Some(response.negotiated_conformance);
                self.state = ClientState::Associated;
                debug!(
                    "associated: max PDU send {}, conformance {}",
                    self.max_pdu_send, response.negotiated_conformance
                );
                Ok(())
            }
            (true, _) => Err(Error::AuthenticationFailed("AARE carries no initiate response".into())),
            (false, _) => Err(Error::AuthenticationFailed(format!(
                "association {}, {}",
                aare.result, aare.result_source_diagnostic
            ))),
        }
    }

    pub fn build_rlrq(&mut self) -> Result<Vec<u8>> {
        let rlrq = match self.settings.is_ciphered() {
            true => RlrqApdu::with_user_information(self.protected_initiate_request()?),
            false => RlrqApdu::new(),
        };
        Ok(rlrq.encode())
    }

    /// Interprets the reply to an RLRQ. The association is released either way.
    pub fn handle_rlre(&mut self, frame: &[u8]) -> Result<()> {
        self.release();
        match Apdu::decode(frame)? {
            Apdu::Rlre(rlre) => {
                debug!("release response, reason {:?}", rlre.reason);
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Seals an outgoing data-exchange APDU when ciphering is configured.
    pub fn protect(&mut self, apdu: Vec<u8>) -> Result<Vec<u8>> {
        match self.settings.ciphering.as_mut() {
            Some(ciphering) => {
                let kind = ciphering.data_key_kind();
                Ok(ciphering.seal(&apdu, kind)?)
            }
            None => Ok(apdu),
        }
    }

    /// Decodes a received frame, opening it first when it is ciphered.
    pub fn decode_response(&mut self, frame: &[u8]) -> Result<Apdu> {
        match Apdu::decode(frame)? {
            Apdu::Ciphered(envelope) => {
                let ciphering = self
                    .settings
                    .ciphering
                    .as_mut()
                    .ok_or_else(|| Error::InvalidResponse("ciphered APDU without ciphering settings".into()))?;
                let plain = ciphering.open(&envelope)?;
                match Apdu::decode(&plain)? {
                    Apdu::Ciphered(_) => Err(Error::InvalidResponse("nested ciphered APDU".into())),
                    apdu => Ok(apdu),
                }
            }
            apdu => Ok(apdu),
        }
    }

    fn envelope_overhead(&self) -> usize {
        match self.settings.is_ciphered() {
            true => ENVELOPE_OVERHEAD + ENVELOPE_LENGTH_FIELD,
            false => 0,
        }
    }

    /// Whether a plain APDU of `len` bytes can be sent in one piece.
    pub fn fits(&self, len: usize) -> bool {
        len + self.envelope_overhead() <= usize::from(self.max_pdu_send)
    }

    fn block_size(&self, header_len: usize) -> usize {
        usize::from(self.max_pdu_send)
            .saturating_sub(header_len + BLOCK_LENGTH_FIELD + self.envelope_overhead())
            .max(1)
    }

    pub fn get_request(
        &mut self,
        attribute: AttributeDescriptor,
        access_selection: Option<SelectiveAccessDescriptor>,
    ) -> GetRequest {
        GetRequest::Normal(GetRequestNormal { invoke_id: self.next_invoke_id(), attribute, access_selection })
    }

    pub fn get_with_list_request(&mut self, attributes: Vec<AttributeWithSelection>) -> Result<GetRequest> {
        if attributes.is_empty() {
            return Err(Error::InvalidParameter("get with list needs at least one attribute".into()));
        }
        Ok(GetRequest::WithList(GetRequestWithList { invoke_id: self.next_invoke_id(), attributes }))
    }

    fn get_block<T>(
        invoke_id: u8,
        block: DataBlockG,
        reassembly: &mut BlockReassembly,
        finish: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<GetProgress<T>> {
        let raw = match block.result {
            DataBlockResult::RawData(raw) => raw,
            DataBlockResult::DataAccessError(result) => {
                *reassembly = BlockReassembly::new();
                return Err(Error::GetRejected(result));
            }
        };
        match reassembly.push(block.block_number, block.last_block, &raw)? {
            Some(complete) => Ok(GetProgress::Complete(finish(&complete)?)),
            None => Ok(GetProgress::Next(GetRequest::Next(GetRequestNext {
                invoke_id,
                block_number: block.block_number,
            }))),
        }
    }

    pub fn handle_get_response(
        &self,
        apdu: Apdu,
        invoke_id: u8,
        reassembly: &mut BlockReassembly,
    ) -> Result<GetProgress<Data>> {
        let response = match apdu {
            Apdu::GetResponse(response) => response,
            other => return Err(unexpected(&other)),
        };
        check_invoke_id(response.invoke_id(), invoke_id)?;
        match response {
            GetResponse::Normal(normal) => match normal.result {
                GetDataResult::Data(data) => Ok(GetProgress::Complete(data)),
                GetDataResult::DataAccessError(result) => Err(Error::GetRejected(result)),
            },
            GetResponse::WithDataBlock(response) => {
                Self::get_block(invoke_id, response.block, reassembly, decode_value)
            }
            GetResponse::WithList(_) => Err(Error::InvalidResponse("get-response-with-list to a single get".into())),
        }
    }

    pub fn handle_get_list_response(
        &self,
        apdu: Apdu,
        invoke_id: u8,
        expected_count: usize,
        reassembly: &mut BlockReassembly,
    ) -> Result<GetProgress<Vec<GetDataResult>>> {
        let response = match apdu {
            Apdu::GetResponse(response) => response,
            other => return Err(unexpected(&other)),
        };
        check_invoke_id(response.invoke_id(), invoke_id)?;
        let check_count = |results: Vec<GetDataResult>| match results.len() == expected_count {
            true => Ok(results),
            false => Err(Error::InvalidResponse(format!(
                "{} results for {expected_count} attributes",
                results.len()
            ))),
        };
        match response {
            GetResponse::WithList(response) => Ok(GetProgress::Complete(check_count(response.results)?)),
            GetResponse::WithDataBlock(response) => {
                Self::get_block(invoke_id, response.block, reassembly, |raw| {
                    let (rest, results) = length_count(parse_count, GetDataResult::parse)
                        .parse(raw)
                        .map_err(CodecError::from_nom)?;
                    if !rest.is_empty() {
                        return Err(Error::Codec(CodecError::TrailingBytes(rest.len())));
                    }
                    check_count(results)
                })
            }
            GetResponse::Normal(_) => Err(Error::InvalidResponse("get-response-normal to a get with list".into())),
        }
    }

    /// The requests that write `value`: one Set-Request-Normal, or a
    /// first-datablock request followed by datablock requests when the value
    /// does not fit into one APDU.
    pub fn set_requests(
        &mut self,
        attribute: AttributeDescriptor,
        access_selection: Option<SelectiveAccessDescriptor>,
        value: Data,
    ) -> Vec<SetRequest> {
        let invoke_id = self.next_invoke_id();
        let raw = value.encode();
        let mut head = Vec::new();
        attribute.encode_into(&mut head);
        encode_access_selection(&access_selection, &mut head);

        if self.fits(SERVICE_HEADER + head.len() + raw.len()) {
            return vec![SetRequest::Normal(SetRequestNormal { invoke_id, attribute, access_selection, value })];
        }

        let blocks = DataBlockSa::split(&raw, self.block_size(SERVICE_HEADER + head.len() + BLOCK_HEADER));
        debug!("set split into {} blocks", blocks.len());
        blocks
            .into_iter()
            .map(|block| match block.block_number {
                1 => SetRequest::WithFirstDataBlock(SetRequestWithFirstDataBlock {
                    invoke_id,
                    attribute,
                    access_selection: access_selection.clone(),
                    block,
                }),
                _ => SetRequest::WithDataBlock(SetRequestWithDataBlock { invoke_id, block }),
            })
            .collect()
    }

    pub fn handle_set_response(&self, apdu: Apdu, request: &SetRequest) -> Result<SetProgress> {
        let response = match apdu {
            Apdu::SetResponse(response) => response,
            other => return Err(unexpected(&other)),
        };
        check_invoke_id(response.invoke_id(), request.invoke_id())?;
        let sent_block = match request {
            SetRequest::WithFirstDataBlock(r) => Some(&r.block),
            SetRequest::WithDataBlock(r) => Some(&r.block),
            _ => None,
        };
        match (sent_block, response) {
            (_, SetResponse::Normal { result, .. }) => set_result(result),
            (Some(block), SetResponse::DataBlock { block_number, .. }) if !block.last_block => {
                match block_number == block.block_number {
                    true => Ok(SetProgress::Acknowledged),
                    false => Err(Error::InvalidResponse(format!(
                        "block {block_number} acknowledged, sent {}",
                        block.block_number
                    ))),
                }
            }
            (Some(block), SetResponse::LastDataBlock { result, block_number, .. }) if block.last_block => {
                match block_number == block.block_number {
                    true => set_result(result),
                    false => Err(Error::InvalidResponse(format!(
                        "last block {block_number} acknowledged, sent {}",
                        block.block_number
                    ))),
                }
            }
            (_, other) => Err(Error::InvalidResponse(format!("unexpected set response {other:?}"))),
        }
    }

    /// The requests that invoke `method`, splitting large parameters into
    /// p-blocks.
    pub fn action_requests(&mut self, method: MethodDescriptor, parameters: Option<Data>) -> Vec<ActionRequest> {
        let invoke_id = self.next_invoke_id();
        let mut head = Vec::new();
        method.encode_into(&mut head);

        let raw = parameters.as_ref().map(Data::encode).unwrap_or_default();
        if self.fits(SERVICE_HEADER + head.len() + 1 + raw.len()) {
            return vec![ActionRequest::Normal(ActionRequestNormal { invoke_id, method, parameters })];
        }

        DataBlockSa::split(&raw, self.block_size(SERVICE_HEADER + head.len() + BLOCK_HEADER))
            .into_iter()
            .map(|block| match block.block_number {
                1 => ActionRequest::WithFirstPBlock { invoke_id, method, block },
                _ => ActionRequest::WithPBlock { invoke_id, block },
            })
            .collect()
    }

    pub fn handle_action_response(
        &self,
        apdu: Apdu,
        request: &ActionRequest,
        reassembly: &mut BlockReassembly,
    ) -> Result<ActionProgress> {
        let response = match apdu {
            Apdu::ActionResponse(response) => response,
            other => return Err(unexpected(&other)),
        };
        let invoke_id = request.invoke_id();
        check_invoke_id(response.invoke_id(), invoke_id)?;
        let sent_block = match request {
            ActionRequest::WithFirstPBlock { block, .. } | ActionRequest::WithPBlock { block, .. } => Some(block),
            _ => None,
        };
        match response {
            ActionResponse::NextPBlock { block_number, .. } => match sent_block {
                Some(block) if !block.last_block && block.block_number == block_number => {
                    Ok(ActionProgress::Acknowledged)
                }
                _ => Err(Error::InvalidResponse(format!("unexpected request for block {block_number}"))),
            },
            ActionResponse::Normal { response, .. } => action_result(response),
            ActionResponse::WithPBlock { block, .. } => {
                match reassembly.push(block.block_number, block.last_block, &block.raw_data)? {
                    Some(raw) => Ok(ActionProgress::Complete(Some(decode_value(&raw)?))),
                    None => Ok(ActionProgress::Next(ActionRequest::NextPBlock {
                        invoke_id,
                        block_number: block.block_number,
                    })),
                }
            }
            ActionResponse::WithList { .. } => {
                Err(Error::InvalidResponse("action-response-with-list to a single action".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{AssociationResult, InitiateResponse, SourceDiagnostic};
    use crate::exception::{ConfirmedService, ConfirmedServiceError, ServiceErrorKind};
    use crate::get::{GetResponseNormal, GetResponseWithDataBlock};
    use crate::obis_code::ObisCode;

    const KEY: [u8; 16] = *b"0123456789ABCDEF";
    const AUTH_KEY: [u8; 16] = *b"AUTHENTICATIONKY";

    fn register_value() -> AttributeDescriptor {
        AttributeDescriptor::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2)
    }

    fn connected(settings: Settings) -> DlmsSession {
        let mut session = DlmsSession::new(settings);
        session.connected();
        session
    }

    fn associated(settings: Settings) -> DlmsSession {
        let mut session = connected(settings);
        let response = InitiateResponse::new(Conformance::DEFAULT_CLIENT, 0x0400);
        let aare = AareApdu::accepted(ApplicationContextName::LogicalNameReferencing, response.encode());
        session.handle_aare(&aare.encode()).unwrap();
        session
    }

    fn data_block(invoke_id: u8, block_number: u32, last_block: bool, raw: &[u8]) -> Apdu {
        Apdu::GetResponse(GetResponse::WithDataBlock(GetResponseWithDataBlock {
            invoke_id,
            block: DataBlockG { last_block, block_number, result: DataBlockResult::RawData(raw.to_vec()) },
        }))
    }

    #[test]
    fn test_build_default_aarq() {
        let mut session = connected(Settings::default());
        let expected = hex::decode("601DA109060760857405080101BE10040E01000000065F1F040000181F0100").unwrap();
        assert_eq!(session.build_aarq().unwrap(), expected);
    }

    #[test]
    fn test_build_aarq_with_password() {
        let settings = Settings::builder().authentication(Authentication::Low).password("12345678").build().unwrap();
        let aarq = connected(settings).build_aarq().unwrap();
        let (_, parsed) = AarqApdu::parse(&aarq).unwrap();
        assert_eq!(parsed.authentication, Authentication::Low);
        assert_eq!(parsed.calling_authentication_value.as_deref(), Some(&b"12345678"[..]));
        assert_eq!(parsed.calling_ap_title, None);
    }

    #[test]
    fn test_invoke_id_wraps_in_low_nibble() {
        let mut session = DlmsSession::new(Settings::default());
        let ids: Vec<u8> = (0..17).map(|_| session.next_invoke_id()).collect();
        assert_eq!(ids[0], 0xC0);
        assert_eq!(ids[15], 0xCF);
        assert_eq!(ids[16], 0xC0);
    }

    #[test]
    fn test_handle_aare_accepted_clamps_pdu_size() {
        let mut session = connected(Settings::builder().max_pdu_send(0x0800).build().unwrap());
        let response = InitiateResponse::new(Conformance::from_bits(0x001018), 0x0200);
        let aare = AareApdu::accepted(ApplicationContextName::LogicalNameReferencing, response.encode());
        session.handle_aare(&aare.encode()).unwrap();

        assert_eq!(session.state(), ClientState::Associated);
        assert_eq!(session.max_pdu_send(), 0x0200);
        assert_eq!(session.server_max_receive_pdu_size(), Some(0x0200));
        assert_eq!(session.negotiated_conformance(), Some(Conformance::from_bits(0x001018)));

        session.release();
        assert_eq!(session.state(), ClientState::Connected);
        assert_eq!(session.max_pdu_send(), 0x0800);
    }

    #[test]
    fn test_handle_aare_rejections() {
        let mut session = connected(Settings::default());
        let aare = AareApdu::rejected(
            ApplicationContextName::LogicalNameReferencing,
            AssociationResult::RejectedPermanent,
            SourceDiagnostic::user(AcseServiceUserDiagnostics::AuthenticationFailure),
        );
        assert!(matches!(session.handle_aare(&aare.encode()), Err(Error::InvalidPassword)));

        let aare = AareApdu::rejected(
            ApplicationContextName::LogicalNameReferencing,
            AssociationResult::RejectedPermanent,
            SourceDiagnostic::user(AcseServiceUserDiagnostics::ApplicationContextNameNotSupported),
        );
        assert!(matches!(session.handle_aare(&aare.encode()), Err(Error::AuthenticationFailed(_))));

        let error = ConfirmedServiceError {
            service: ConfirmedService::InitiateError,
            error: ServiceErrorKind::Initiate,
            value: 1,
        };
        let mut aare = AareApdu::rejected(
            ApplicationContextName::LogicalNameReferencing,
            AssociationResult::RejectedPermanent,
            SourceDiagnostic::user(AcseServiceUserDiagnostics::NoReasonGiven),
        );
        aare.user_information = Some(error.encode());
        assert!(matches!(session.handle_aare(&aare.encode()), Err(Error::ServiceError(e)) if e == error));

        assert!(matches!(session.handle_aare(&[0xD8, 0x01, 0x02]), Err(Error::AuthenticationFailed(_))));
        assert!(matches!(session.handle_aare(&[0xC4, 0x01]), Err(Error::InvalidResponse(_))));
        assert_eq!(session.state(), ClientState::Connected);
    }

    #[test]
    fn test_ciphered_association_and_get() {
        let client = Ciphering::new(*b"CLIENT01", KEY, AUTH_KEY);
        let mut server = Ciphering::new(*b"SERVER01", KEY, AUTH_KEY).with_peer_system_title(*b"CLIENT01");
        let mut session = connected(Settings::builder().ciphering(client).build().unwrap());

        let (_, aarq) = AarqApdu::parse(&session.build_aarq().unwrap()).unwrap();
        assert_eq!(aarq.application_context_name, ApplicationContextName::LogicalNameReferencingWithCiphering);
        assert_eq!(aarq.calling_ap_title.as_deref(), Some(&b"CLIENT01"[..]));
        assert_eq!(aarq.user_information[0], 0x21);
        let request = server.open(&Envelope::decode(&aarq.user_information).unwrap()).unwrap();
        assert!(InitiateRequest::parse(&request).is_ok());

        let response = InitiateResponse::new(Conformance::DEFAULT_CLIENT, 0x0400).encode();
        let mut aare = AareApdu::accepted(
            ApplicationContextName::LogicalNameReferencingWithCiphering,
            server.seal(&response, KeyKind::Global).unwrap(),
        );
        aare.responding_ap_title = Some(b"SERVER01".to_vec());
        session.handle_aare(&aare.encode()).unwrap();
        assert_eq!(session.ciphering().unwrap().peer_system_title, Some(*b"SERVER01"));

        let request = session.get_request(register_value(), None);
        let sealed = session.protect(request.encode()).unwrap();
        assert_eq!(sealed[0], 0xC8);
        assert_eq!(server.open(&Envelope::decode(&sealed).unwrap()).unwrap(), request.encode());

        let reply = GetResponse::Normal(GetResponseNormal {
            invoke_id: request.invoke_id(),
            result: GetDataResult::Data(Data::DoubleLongUnsigned(1234)),
        });
        let frame = server.seal(&reply.encode(), KeyKind::Global).unwrap();
        let apdu = session.decode_response(&frame).unwrap();
        let progress = session.handle_get_response(apdu, request.invoke_id(), &mut BlockReassembly::new()).unwrap();
        assert_eq!(progress, GetProgress::Complete(Data::DoubleLongUnsigned(1234)));

        // The same envelope again is a replay.
        assert!(matches!(
            session.decode_response(&frame),
            Err(Error::FailureInvocationCounter { received: 1, last: 1 })
        ));
    }

    #[test]
    fn test_get_reassembles_blocks() {
        let mut session = associated(Settings::default());
        let value = Data::Array((0..30).map(Data::LongUnsigned).collect());
        let raw = value.encode();
        let chunks: Vec<&[u8]> = raw.chunks(raw.len() / 3 + 1).collect();
        assert_eq!(chunks.len(), 3);

        let GetRequest::Normal(request) = session.get_request(register_value(), None) else { unreachable!() };
        let invoke_id = request.invoke_id;
        let mut reassembly = BlockReassembly::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let number = i as u32 + 1;
            let last = i == 2;
            let progress = session
                .handle_get_response(data_block(invoke_id, number, last, chunk), invoke_id, &mut reassembly)
                .unwrap();
            match progress {
                GetProgress::Next(GetRequest::Next(next)) => {
                    assert!(!last);
                    assert_eq!(next.block_number, number);
                }
                GetProgress::Complete(data) => {
                    assert!(last);
                    assert_eq!(data, value);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_get_block_out_of_order() {
        let session = associated(Settings::default());
        let mut reassembly = BlockReassembly::new();
        session.handle_get_response(data_block(0xC1, 1, false, &[0x01, 0x02]), 0xC1, &mut reassembly).unwrap();
        let result = session.handle_get_response(data_block(0xC1, 3, true, &[0x11, 0x00]), 0xC1, &mut reassembly);
        assert!(matches!(result, Err(Error::InvalidResponse(_))));
        assert_eq!(reassembly.received_len(), 0);
    }

    #[test]
    fn test_get_response_checks() {
        let session = associated(Settings::default());
        let mut reassembly = BlockReassembly::new();
        let reply = |invoke_id, result| {
            Apdu::GetResponse(GetResponse::Normal(GetResponseNormal { invoke_id, result }))
        };

        let rejected = reply(0xC1, GetDataResult::DataAccessError(DataAccessResult::ObjectUndefined));
        assert!(matches!(
            session.handle_get_response(rejected, 0xC1, &mut reassembly),
            Err(Error::GetRejected(DataAccessResult::ObjectUndefined))
        ));

        let other_id = reply(0xC2, GetDataResult::Data(Data::Null));
        assert!(matches!(
            session.handle_get_response(other_id, 0xC1, &mut reassembly),
            Err(Error::CheckDoesNotMatch(_))
        ));

        let set = Apdu::SetResponse(SetResponse::Normal { invoke_id: 0xC1, result: DataAccessResult::Success });
        assert!(matches!(session.handle_get_response(set, 0xC1, &mut reassembly), Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn test_get_with_list() {
        let mut session = associated(Settings::default());
        assert!(matches!(session.get_with_list_request(Vec::new()), Err(Error::InvalidParameter(_))));

        let attributes = vec![AttributeWithSelection::new(register_value()); 2];
        let request = session.get_with_list_request(attributes).unwrap();
        let invoke_id = request.invoke_id();

        // Results arrive as one data block holding `count, result, result`.
        let raw = [0x02, 0x00, 0x11, 0x07, 0x01, 0x04];
        let progress = session
            .handle_get_list_response(data_block(invoke_id, 1, true, &raw), invoke_id, 2, &mut BlockReassembly::new())
            .unwrap();
        assert_eq!(
            progress,
            GetProgress::Complete(vec![
                GetDataResult::Data(Data::Unsigned(7)),
                GetDataResult::DataAccessError(DataAccessResult::ObjectUndefined),
            ])
        );
    }

    #[test]
    fn test_set_splits_large_values() {
        let mut session = associated(Settings::builder().max_pdu_send(64).build().unwrap());
        let value = Data::OctetString(vec![0xAB; 150]);
        let requests = session.set_requests(register_value(), None, value.clone());
        assert!(requests.len() > 1);
        assert!(matches!(requests[0], SetRequest::WithFirstDataBlock(_)));
        assert!(requests.iter().all(|r| r.encode().len() <= 64));

        let mut raw = Vec::new();
        for (i, request) in requests.iter().enumerate() {
            let block = match request {
                SetRequest::WithFirstDataBlock(r) => &r.block,
                SetRequest::WithDataBlock(r) => &r.block,
                other => panic!("unexpected {other:?}"),
            };
            assert_eq!(block.block_number, i as u32 + 1);
            assert_eq!(block.last_block, i + 1 == requests.len());
            raw.extend_from_slice(&block.raw_data);

            let invoke_id = request.invoke_id();
            let response = match block.last_block {
                false => SetResponse::DataBlock { invoke_id, block_number: block.block_number },
                true => SetResponse::LastDataBlock {
                    invoke_id,
                    result: DataAccessResult::Success,
                    block_number: block.block_number,
                },
            };
            let expected = if block.last_block { SetProgress::Complete } else { SetProgress::Acknowledged };
            assert_eq!(session.handle_set_response(Apdu::SetResponse(response), request).unwrap(), expected);
        }
        assert_eq!(raw, value.encode());

        let small = session.set_requests(register_value(), None, Data::Unsigned(1));
        assert!(matches!(small.as_slice(), [SetRequest::Normal(_)]));
        let rejected = SetResponse::Normal { invoke_id: small[0].invoke_id(), result: DataAccessResult::ReadWriteDenied };
        assert!(matches!(
            session.handle_set_response(Apdu::SetResponse(rejected), &small[0]),
            Err(Error::SetRejected(DataAccessResult::ReadWriteDenied))
        ));
    }

    #[test]
    fn test_action_blocks() {
        let mut session = associated(Settings::builder().max_pdu_send(48).build().unwrap());
        let method = MethodDescriptor::new(18, ObisCode::new(0, 0, 44, 0, 0, 255), 2);
        let requests = session.action_requests(method, Some(Data::OctetString(vec![0x55; 100])));
        assert!(matches!(requests[0], ActionRequest::WithFirstPBlock { .. }));
        assert!(matches!(requests.last(), Some(ActionRequest::WithPBlock { block, .. }) if block.last_block));

        let first = &requests[0];
        let ack = ActionResponse::NextPBlock { invoke_id: first.invoke_id(), block_number: 1 };
        let mut reassembly = BlockReassembly::new();
        assert_eq!(
            session.handle_action_response(Apdu::ActionResponse(ack), first, &mut reassembly).unwrap(),
            ActionProgress::Acknowledged
        );

        // Return value arriving in two p-blocks.
        let last = requests.last().unwrap();
        let raw = Data::LongUnsigned(0x1234).encode();
        let block = |number, last_block, raw: &[u8]| {
            Apdu::ActionResponse(ActionResponse::WithPBlock {
                invoke_id: last.invoke_id(),
                block: DataBlockSa { last_block, block_number: number, raw_data: raw.to_vec() },
            })
        };
        let progress = session.handle_action_response(block(1, false, &raw[..1]), last, &mut reassembly).unwrap();
        assert_eq!(
            progress,
            ActionProgress::Next(ActionRequest::NextPBlock { invoke_id: last.invoke_id(), block_number: 1 })
        );
        let progress = session.handle_action_response(block(2, true, &raw[1..]), last, &mut reassembly).unwrap();
        assert_eq!(progress, ActionProgress::Complete(Some(Data::LongUnsigned(0x1234))));
    }

    #[test]
    fn test_action_results() {
        let mut session = associated(Settings::default());
        let method = MethodDescriptor::new(70, ObisCode::new(0, 0, 96, 3, 10, 255), 1);
        let requests = session.action_requests(method, Some(Data::Integer(0)));
        let [request] = requests.as_slice() else { panic!("expected one request") };

        let response = |result| {
            Apdu::ActionResponse(ActionResponse::Normal {
                invoke_id: request.invoke_id(),
                response: ActionResponseWithOptionalData { result, return_parameters: None },
            })
        };
        let mut reassembly = BlockReassembly::new();
        assert_eq!(
            session.handle_action_response(response(ActionResult::Success), request, &mut reassembly).unwrap(),
            ActionProgress::Complete(None)
        );
        assert!(matches!(
            session.handle_action_response(response(ActionResult::TemporaryFailure), request, &mut reassembly),
            Err(Error::ActionRejected(ActionResult::TemporaryFailure))
        ));
    }

    #[test]
    fn test_release() {
        let mut session = associated(Settings::default());
        assert_eq!(session.build_rlrq().unwrap(), [0x62, 0x03, 0x80, 0x01, 0x00]);
        session.handle_rlre(&[0x63, 0x03, 0x80, 0x01, 0x00]).unwrap();
        assert_eq!(session.state(), ClientState::Connected);
        assert!(session.require_state(ClientState::Associated).is_err());

        session.disconnected();
        assert_eq!(session.state(), ClientState::Disconnected);
    }
}
