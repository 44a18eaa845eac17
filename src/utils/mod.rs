pub mod respond;

use chrono::NaiveDateTime;

pub fn to_iso(dt: NaiveDateTime) -> String {
    dt.and_utc().to_rfc3339()
}
