//! Synthetic event generator
//!
//! Produces transaction-log style records from a fixed template. Each
//! transaction is three records, `START`, `INFO`, `SUCCESS`, sharing one
//! `Tid`; a new transaction gets a fresh UUID.

use serde_json::{json, Value};
use uuid::Uuid;

use super::logline::STATUS_FIELD;
use super::pacing::UXT_FIELD;
use crate::event::Record;

/// Key holding the transaction ID
pub const TID_FIELD: &str = "Tid";

/// Status sequence of one transaction
pub const STATUS_CYCLE: [&str; 3] = ["START", "INFO", "SUCCESS"];

fn template() -> Record {
    let value = json!({
        "Status": "INFO",
        "Uxd": "03/12/2025",
        "Uxt": "12:14:22.946",
        "Dbd": "",
        "Eid": "sss",
        "Hnm": "bdolitutapp1.telkom.co.za",
        "Pid": "4272",
        "Fid": "_log_QueryProviderEmployeesByFunction",
        "Tid": "",
        "Fnm": "ssssessionimpl.cc",
        "Mtp": "TrnEnd",
        "Key": "11",
        "Uid": "Kgopajt",
        "Cid": "PIGGYBACK NOT USED",
        "Icn": "10.254.105.48",
        "Ocn": "",
        "Ret": "0",
        "Ern": "0",
        "Ct1": "17547",
        "Ct2": "-1:0",
        "Msg": "Transaction ended with success"
    });

    match value {
        Value::Object(record) => record,
        _ => Record::new(),
    }
}

/// Generates an endless stream of template records
#[derive(Debug, Clone)]
pub struct LoadGenerator {
    template: Record,
    step: usize,
    tid: String,
}

impl Default for LoadGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadGenerator {
    pub fn new() -> Self {
        Self {
            template: template(),
            step: 0,
            tid: Uuid::new_v4().to_string(),
        }
    }

    /// Next record, stamped with the current local time
    pub fn next_record(&mut self) -> Record {
        let uxt = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
        self.next_record_at(uxt)
    }

    /// Next record with an explicit `Uxt`
    pub fn next_record_at(&mut self, uxt: String) -> Record {
        let mut record = self.template.clone();
        record.insert(STATUS_FIELD.into(), Value::from(STATUS_CYCLE[self.step]));
        record.insert(TID_FIELD.into(), Value::from(self.tid.clone()));
        record.insert(UXT_FIELD.into(), Value::from(uxt));

        self.step = (self.step + 1) % STATUS_CYCLE.len();
        if self.step == 0 {
            self.tid = Uuid::new_v4().to_string();
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::pacing::parse_uxt;

    #[test]
    fn test_status_cycle_and_tid() {
        let mut generator = LoadGenerator::new();
        let records: Vec<Record> = (0..6).map(|_| generator.next_record()).collect();

        let statuses: Vec<&str> = records
            .iter()
            .map(|r| r[STATUS_FIELD].as_str().unwrap())
            .collect();
        assert_eq!(
            statuses,
            vec!["START", "INFO", "SUCCESS", "START", "INFO", "SUCCESS"]
        );

        assert_eq!(records[0][TID_FIELD], records[1][TID_FIELD]);
        assert_eq!(records[1][TID_FIELD], records[2][TID_FIELD]);
        assert_ne!(records[2][TID_FIELD], records[3][TID_FIELD]);
        assert_eq!(records[3][TID_FIELD], records[5][TID_FIELD]);

        let tid = records[0][TID_FIELD].as_str().unwrap();
        assert!(Uuid::parse_str(tid).is_ok());
    }

    #[test]
    fn test_uxt_is_parsable() {
        let record = LoadGenerator::new().next_record();
        let uxt = record[UXT_FIELD].as_str().unwrap();

        assert_eq!(uxt.len(), 12);
        assert!(parse_uxt(uxt).is_some());
    }

    #[test]
    fn test_template_fields_kept_in_order() {
        let record = LoadGenerator::new().next_record_at("01:02:03.004".into());
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();

        assert_eq!(keys.len(), 21);
        assert_eq!(&keys[..3], &["Status", "Uxd", "Uxt"]);
        assert_eq!(keys[8], "Tid");
        assert_eq!(record["Msg"], "Transaction ended with success");
        assert_eq!(record[UXT_FIELD], "01:02:03.004");
    }
}
