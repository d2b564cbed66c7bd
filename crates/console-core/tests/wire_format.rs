//! Integration tests for the upstream wire format.
//!
//! The command envelope is consumed by a third-party service that matches on
//! the exact document text, so these tests compare whole frames as strings
//! rather than parsing them back.

use console_core::protocol::{command_frame, parse_inbound, subscribe_frame, InboundFrame};
use console_core::Region;

#[test]
fn test_command_frame_is_bit_exact() {
    // Arrange
    let expected = concat!(
        r#"{"operationName":"sendConsoleMessage","#,
        r#""variables":{"sid":42,"region":"EU","message":"serverinfo"},"#,
        r#""query":"mutation sendConsoleMessage($sid: Int!, $region: REGION!, $message: String!) { sendConsoleMessage(rsid:{id:$sid,region:$region}, message:$message){ok __typename} }"}"#
    );

    // Act
    let frame = command_frame(42, Region::Eu, "serverinfo").expect("encode");

    // Assert
    assert_eq!(frame, expected);
}

#[test]
fn test_command_frame_for_each_region() {
    for (region, spelled) in [(Region::Us, "US"), (Region::Eu, "EU"), (Region::As, "AS")] {
        let frame = command_frame(7, region, "status").expect("encode");
        assert!(
            frame.contains(&format!(r#""region":"{spelled}""#)),
            "frame for {region:?} was {frame}"
        );
    }
}

#[test]
fn test_command_frame_is_single_line() {
    let frame = command_frame(1, Region::Us, "say line one\nline two").expect("encode");
    assert!(!frame.contains('\n'), "raw newline leaked into frame: {frame}");
}

#[test]
fn test_subscribe_frame_is_valid_json_for_upstream() {
    let frame = subscribe_frame(9001, Region::Us);
    let parsed: serde_json::Value = serde_json::from_str(&frame).expect("json");
    assert_eq!(parsed["payload"]["variables"]["sid"], 9001);
}

#[test]
fn test_console_line_survives_a_full_data_envelope() {
    let frame = r#"{"id":"1","type":"data","payload":{"data":{"consoleMessages":{"stream":"stdout","channel":0,"message":"[CHAT] Alice : gg","__typename":"ConsoleMessage"}}}}"#;
    assert_eq!(
        parse_inbound(frame),
        Ok(InboundFrame::ConsoleLine("[CHAT] Alice : gg".to_string()))
    );
}
