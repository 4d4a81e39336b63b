//! TestRecord codec
//!
//! A record lives on the blackboard as one key per field, all under the same
//! per-engine root, e.g. `SAFS/HOOK/inputrecord`. Numeric fields are decimal
//! strings. The key suffixes are shared with existing engines and must not
//! change.

use crate::blackboard::Blackboard;
use crate::types::{StatusCode, TestRecord};
use crate::{Error, Result};
use tracing::trace;

pub const KEY_FILENAME: &str = "filename";
pub const KEY_LINENUMBER: &str = "linenumber";
pub const KEY_INPUTRECORD: &str = "inputrecord";
pub const KEY_SEPARATOR: &str = "separator";
pub const KEY_TESTLEVEL: &str = "testlevel";
pub const KEY_APPMAPNAME: &str = "appmapname";
pub const KEY_STATUSCODE: &str = "statuscode";
pub const KEY_FAC: &str = "fac";
pub const KEY_STATUSINFO: &str = "statusinfo";

/// Default blackboard root shared by drivers and engines.
pub const DEFAULT_TRD_ROOT: &str = "SAFS/HOOK/";

/// Write every field of `rec` under `prefix`.
pub async fn encode(rec: &TestRecord, prefix: &str, bb: &dyn Blackboard) -> Result<()> {
    trace!("encoding record line {} under {}", rec.line_number, prefix);
    let key = |field: &str| format!("{}{}", prefix, field);

    bb.set(&key(KEY_INPUTRECORD), &rec.input_record).await?;
    bb.set(&key(KEY_LINENUMBER), &rec.line_number.to_string()).await?;
    bb.set(&key(KEY_SEPARATOR), &rec.separator).await?;
    bb.set(&key(KEY_TESTLEVEL), &rec.test_level.to_string()).await?;
    bb.set(&key(KEY_FILENAME), &rec.source_id).await?;
    bb.set(&key(KEY_APPMAPNAME), &rec.app_map_id).await?;
    bb.set(&key(KEY_FAC), &rec.facility).await?;
    bb.set(&key(KEY_STATUSCODE), &rec.status_code.0.to_string()).await?;
    bb.set(&key(KEY_STATUSINFO), &rec.status_info).await?;
    Ok(())
}

/// Read a record back from under `prefix`.
///
/// A numeric field that does not parse is reported as
/// [`Error::MalformedField`]; it is never replaced by a default.
pub async fn decode(prefix: &str, bb: &dyn Blackboard) -> Result<TestRecord> {
    let key = |field: &str| format!("{}{}", prefix, field);

    let line_key = key(KEY_LINENUMBER);
    let line_number = parse_numeric::<i64>(&line_key, bb.get(&line_key).await?)?;
    let status_key = key(KEY_STATUSCODE);
    let status_code = StatusCode(parse_numeric::<i32>(&status_key, bb.get(&status_key).await?)?);

    Ok(TestRecord {
        source_id: bb.get(&key(KEY_FILENAME)).await?,
        line_number,
        input_record: bb.get(&key(KEY_INPUTRECORD)).await?,
        separator: bb.get(&key(KEY_SEPARATOR)).await?,
        test_level: bb.get(&key(KEY_TESTLEVEL)).await?.into(),
        app_map_id: bb.get(&key(KEY_APPMAPNAME)).await?,
        status_code,
        facility: bb.get(&key(KEY_FAC)).await?,
        status_info: bb.get(&key(KEY_STATUSINFO)).await?,
    })
}

/// Read only the status code, as an engine-side result check does.
pub async fn decode_status(prefix: &str, bb: &dyn Blackboard) -> Result<StatusCode> {
    let key = format!("{}{}", prefix, KEY_STATUSCODE);
    let value = bb.get(&key).await?;
    Ok(StatusCode(parse_numeric(&key, value)?))
}

fn parse_numeric<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::MalformedField {
            key: key.to_string(),
            value,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::MemoryBlackboard;
    use crate::types::TestLevel;

    fn sample() -> TestRecord {
        TestRecord {
            source_id: "tables/Login.sdd".to_string(),
            line_number: 7,
            input_record: "C,Click".to_string(),
            separator: ",".to_string(),
            test_level: TestLevel::Step,
            app_map_id: "Login.map".to_string(),
            status_code: StatusCode::NO_SCRIPT_FAILURE,
            facility: "LoginLog".to_string(),
            status_info: String::new(),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let bb = MemoryBlackboard::new();
        let rec = sample();
        encode(&rec, "SAFS/Eng1", &bb).await.unwrap();
        assert_eq!(decode("SAFS/Eng1", &bb).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn test_round_trip_empty_and_custom_fields() {
        let bb = MemoryBlackboard::new();
        let rec = TestRecord {
            input_record: String::new(),
            separator: "::".to_string(),
            test_level: TestLevel::Other("block".to_string()),
            status_code: StatusCode(-42),
            line_number: i64::MAX,
            ..sample()
        };
        encode(&rec, DEFAULT_TRD_ROOT, &bb).await.unwrap();
        assert_eq!(decode(DEFAULT_TRD_ROOT, &bb).await.unwrap(), rec);
    }

    #[tokio::test]
    async fn test_key_layout() {
        let bb = MemoryBlackboard::new();
        encode(&sample(), "SAFS/HOOK/", &bb).await.unwrap();
        assert_eq!(bb.get("SAFS/HOOK/statuscode").await.unwrap(), "-1");
        assert_eq!(bb.get("SAFS/HOOK/linenumber").await.unwrap(), "7");
        assert_eq!(bb.get("SAFS/HOOK/filename").await.unwrap(), "tables/Login.sdd");
        assert_eq!(bb.get("SAFS/HOOK/fac").await.unwrap(), "LoginLog");
        assert_eq!(bb.keys_with_prefix("SAFS/HOOK/").len(), 9);
    }

    #[tokio::test]
    async fn test_corrupt_status_code_is_malformed() {
        let bb = MemoryBlackboard::new();
        let rec = TestRecord {
            line_number: 7,
            input_record: "C,Click".to_string(),
            separator: ",".to_string(),
            status_code: StatusCode(-1),
            ..Default::default()
        };
        encode(&rec, "SAFS/Eng1", &bb).await.unwrap();
        bb.set("SAFS/Eng1statuscode", "abc").await.unwrap();

        match decode("SAFS/Eng1", &bb).await {
            Err(Error::MalformedField { key, value }) => {
                assert_eq!(key, "SAFS/Eng1statuscode");
                assert_eq!(value, "abc");
            }
            other => panic!("expected MalformedField, got {:?}", other),
        }
        assert!(matches!(
            decode_status("SAFS/Eng1", &bb).await,
            Err(Error::MalformedField { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_line_number_is_malformed() {
        let bb = MemoryBlackboard::new();
        encode(&sample(), "P/", &bb).await.unwrap();
        bb.set("P/linenumber", "seven").await.unwrap();
        assert!(matches!(
            decode("P/", &bb).await,
            Err(Error::MalformedField { key, .. }) if key == "P/linenumber"
        ));
    }

    #[tokio::test]
    async fn test_missing_field() {
        let bb = MemoryBlackboard::new();
        assert!(matches!(decode("none/", &bb).await, Err(Error::MissingKey(_))));
    }
}
