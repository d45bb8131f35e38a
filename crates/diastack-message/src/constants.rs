// Command codes
pub const CMD_CAPABILITIES_EXCHANGE: u32 = 257;
pub const CMD_DEVICE_WATCHDOG: u32 = 280;
pub const CMD_DISCONNECT_PEER: u32 = 282;

/// Application id of the base protocol (CER/DWR/DPR)
pub const APP_COMMON: u32 = 0;
/// Relay agents advertise this and match every application
pub const APP_RELAY: u32 = 0xFFFF_FFFF;

// AVP codes
pub const AVP_USER_NAME: u32 = 1;
pub const AVP_HOST_IP_ADDRESS: u32 = 257;
pub const AVP_AUTH_APPLICATION_ID: u32 = 258;
pub const AVP_ACCT_APPLICATION_ID: u32 = 259;
pub const AVP_VENDOR_SPECIFIC_APPLICATION_ID: u32 = 260;
pub const AVP_SESSION_ID: u32 = 263;
pub const AVP_ORIGIN_HOST: u32 = 264;
pub const AVP_SUPPORTED_VENDOR_ID: u32 = 265;
pub const AVP_VENDOR_ID: u32 = 266;
pub const AVP_FIRMWARE_REVISION: u32 = 267;
pub const AVP_RESULT_CODE: u32 = 268;
pub const AVP_PRODUCT_NAME: u32 = 269;
pub const AVP_DISCONNECT_CAUSE: u32 = 273;
pub const AVP_ORIGIN_STATE_ID: u32 = 278;
pub const AVP_FAILED_AVP: u32 = 279;
pub const AVP_ERROR_MESSAGE: u32 = 281;
pub const AVP_ROUTE_RECORD: u32 = 282;
pub const AVP_DESTINATION_REALM: u32 = 283;
pub const AVP_DESTINATION_HOST: u32 = 293;
pub const AVP_ORIGIN_REALM: u32 = 296;
pub const AVP_EXPERIMENTAL_RESULT: u32 = 297;
pub const AVP_EXPERIMENTAL_RESULT_CODE: u32 = 298;
pub const AVP_INBAND_SECURITY_ID: u32 = 299;

// Result-Code values (AVP 268)
pub const RESULT_CODE_SUCCESS: u32 = 2001; // DIAMETER_SUCCESS
pub const RESULT_CODE_COMMAND_UNSUPPORTED: u32 = 3001; // DIAMETER_COMMAND_UNSUPPORTED
pub const RESULT_CODE_UNABLE_TO_DELIVER: u32 = 3002; // DIAMETER_UNABLE_TO_DELIVER
pub const RESULT_CODE_REALM_NOT_SERVED: u32 = 3003; // DIAMETER_REALM_NOT_SERVED
pub const RESULT_CODE_INVALID_HDR_BITS: u32 = 3008; // DIAMETER_INVALID_HDR_BITS
pub const RESULT_CODE_UNKNOWN_PEER: u32 = 3010; // DIAMETER_UNKNOWN_PEER
pub const RESULT_CODE_MISSING_AVP: u32 = 5005; // DIAMETER_MISSING_AVP
pub const RESULT_CODE_NO_COMMON_APPLICATION: u32 = 5010; // DIAMETER_NO_COMMON_APPLICATION
pub const RESULT_CODE_UNABLE_TO_COMPLY: u32 = 5012; // DIAMETER_UNABLE_TO_COMPLY

// Disconnect-Cause values (AVP 273)
pub const DISCONNECT_CAUSE_REBOOTING: u32 = 0;
pub const DISCONNECT_CAUSE_BUSY: u32 = 1;
pub const DISCONNECT_CAUSE_DO_NOT_WANT_TO_TALK_TO_YOU: u32 = 2;

/// 3xxx answers are protocol errors and carry the E bit
pub fn is_protocol_error(result_code: u32) -> bool {
    (3000..4000).contains(&result_code)
}

/// 2xxx answers
pub fn is_success(result_code: u32) -> bool {
    (2000..3000).contains(&result_code)
}
