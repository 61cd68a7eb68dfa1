/*!

This is the long-form manual for `checkin_ledger` and `checkin-tally`.

## Input files

Rosters are Excel workbooks, either `.xlsx` or the older `.xls`. Only the
first worksheet is read. Any other extension is rejected before the file is
opened.

The header is expected on the first row. When no identifier column can be
found there, the second row is tried instead, which covers sheets that start
with a title banner.

### Identifier column

The column holding the participant names is found by matching the headers
against a list of keywords (`昵称`, `nickname`, `name`, `姓名`, `用户名`, ...):
exact matches first, then headers containing a keyword. If nothing matches,
the first column is used when most of its first values are text.

Identifiers are cleaned before scoring: decorations and emoji are removed,
runs of spaces collapse to one space. Rows whose identifier ends up empty are
dropped.

By default only the first row of each identifier in a file is kept. Use
`--keep-duplicates` (or `"dedupeWithinFile": false`) to score every row.

### Time column

An optional column (`提交时间`, `time`, `timestamp`, ...) gives the submission
time of each row. It is only used for the reward of the earliest
submissions. Times are compared as text, so they should be written in a
sortable form such as `2024-01-01 08:00:00`; date cells are converted to that
form.

### Weights

The weight of a row ("码数") multiplies its points. Sheets with columns named
`image1`, `image2`, ... (or `图片1`, ...) get one point of weight per image
cell carrying a link. Columns marked as corrections are not counted. Rows
without any linked image, and sheets without image columns, have a weight
of 1.

A weight given on the command line (`--weight day1.xlsx=3`) or in the
configuration file replaces the weights found in the sheet.

## Scoring

Each row earns `base score × weight` points. With a reward count `k`, the
`k` earliest submissions earn `reward multiplier × base score × weight`
instead.

Submitting a file again is safe:
- with the same weight and settings, it is skipped;
- with another uniform weight, the scores of that file are shifted by the
  difference;
- otherwise the previous scoring of the file is revoked and it is scored
  again.

## Ledger files

Each session keeps its ledger in `records_<session>.json` under the data
directory. Backups are written as `backup_<session>_<YYYYmmdd_HHMMSS>.json`
before every import and every clear. Ledgers written by older versions
(with `records`, or `records_by_nickname` and `records_by_name`) are read and
upgraded on the next save.

Session files that were not modified for more than `retentionHours` hours
(24 by default) are deleted when the program starts.

## Configuration

All the settings can be stored in a JSON file passed with `--config`:

```json
{
  "sessionId": "a1b2c3d4_1700000000",
  "dataDirectory": "data",
  "retentionHours": 24,
  "baseScore": 1.0,
  "rewardCount": 3,
  "rewardMultiplier": 1.5,
  "dedupeWithinFile": true,
  "fileWeights": { "day3.xlsx": 2 }
}
```

Command line flags take precedence over the file.

*/
