/*!
Extraction of participants from check-in spreadsheets, and a cumulative,
weighted score ledger.

The crate has two halves:
- [`extract()`] turns one sheet into parallel lists of identifiers, times and
  weights. Excel files are read through [`ExcelSource`]; anything else can
  implement [`TabularSource`].
- [`ScoringLedger`] applies those lists to the ledger document of a session,
  kept behind a [`LedgerStore`].

```
use checkin_ledger::*;

let grid = SheetGrid::from_strings(&[
    &["编号", "昵称", "提交时间"],
    &["1", "Alice", "2024-01-01 08:00:00"],
    &["2", "Bob", "2024-01-01 08:05:00"],
]);
let extraction = extract(&grid, "day1.xlsx", &ExtractOptions::default()).unwrap();

let mut ledger = ScoringLedger::new(MemoryStore::new("demo"));
let config = ScoringConfig { reward_count: 1, ..ScoringConfig::DEFAULT };
let weight = extraction.weight();
let plan = ledger.plan(&extraction.file_name, &weight, &config);
ledger.apply(&plan, &extraction, &weight, &config).unwrap();

assert_eq!(ledger.leaderboard()[0].identifier, "Alice");
```

See the [`manual`] for the details of the heuristics and of the scoring.
*/

mod config;
mod document;
mod error;
mod excel;
mod extract;
mod ledger;
pub mod manual;
mod scoring;
mod table;

pub use crate::config::*;
pub use crate::document::*;
pub use crate::error::*;
pub use crate::excel::*;
pub use crate::extract::*;
pub use crate::ledger::*;
pub use crate::scoring::*;
pub use crate::table::*;
