//! Read-only summaries over a time window.
//!
//! Minutes are clipped to the window: a session contributes
//! `max(0, min(end, window_end_exclusive) - max(start, window_start))`, floored
//! to whole minutes per session. Open sessions end at `now`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shiftclaw_core::{BreakKind, GroupId, MemberId, Result};

use crate::clock::Window;
use crate::store::SessionStore;

/// Count and clipped minutes of one break kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTotals {
    pub count: u32,
    pub minutes: i64,
}

/// A member with a check-in count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedMember {
    pub member: MemberId,
    pub display_name: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub window: Window,
    /// Distinct members who checked in inside the window.
    pub checkin_count: u32,
    pub kinds: BTreeMap<BreakKind, KindTotals>,
    pub work_minutes: i64,
    pub top_checkins: Vec<RankedMember>,
}

impl WindowSummary {
    pub fn kind(&self, kind: BreakKind) -> KindTotals {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }
}

/// One row of the per-member table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRow {
    pub member: MemberId,
    pub display_name: String,
    pub work_minutes: i64,
    pub break_counts: BTreeMap<BreakKind, u32>,
}

impl MemberRow {
    pub fn breaks(&self, kind: BreakKind) -> u32 {
        self.break_counts.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberStats {
    pub member: MemberId,
    pub display_name: String,
    pub total_checkins: u32,
    pub last_checkin: Option<DateTime<Utc>>,
}

/// Window queries over a [`SessionStore`].
pub struct Aggregator {
    store: Arc<dyn SessionStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Latest check-in name, or the numeric id when the member never checked in.
    pub fn display_name(&self, group: GroupId, member: MemberId) -> Result<String> {
        Ok(self
            .store
            .latest_display_name(group, member)?
            .unwrap_or_else(|| member.to_string()))
    }

    pub fn summarize_window(
        &self,
        group: GroupId,
        window: &Window,
        now: DateTime<Utc>,
        top_n: usize,
    ) -> Result<WindowSummary> {
        let checkins = self.store.checkins_between(group, window)?;
        let mut per_member: BTreeMap<MemberId, u32> = BTreeMap::new();
        for c in &checkins {
            *per_member.entry(c.member).or_default() += 1;
        }

        let mut kinds: BTreeMap<BreakKind, KindTotals> =
            BreakKind::ALL.iter().map(|k| (*k, KindTotals::default())).collect();
        for b in self.store.breaks_overlapping(group, window)? {
            let totals = kinds.entry(b.kind).or_default();
            if window.contains(b.start) {
                totals.count += 1;
            }
            totals.minutes += window.clipped_minutes(b.start, b.end.unwrap_or(now));
        }

        let work_minutes = self
            .store
            .work_overlapping(group, window)?
            .iter()
            .map(|w| window.clipped_minutes(w.start, w.end.unwrap_or(now)))
            .sum();

        let checkin_count = u32::try_from(per_member.len()).unwrap_or(u32::MAX);
        let top_checkins = self.rank(group, per_member, top_n)?;

        Ok(WindowSummary {
            window: *window,
            checkin_count,
            kinds,
            work_minutes,
            top_checkins,
        })
    }

    /// Members active in the window: checked in, started a break, or worked.
    /// Sorted by work minutes desc, toilet count asc, takeout count asc, name asc.
    pub fn per_member_table(
        &self,
        group: GroupId,
        window: &Window,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemberRow>> {
        let mut members: BTreeSet<MemberId> = BTreeSet::new();
        let mut work: HashMap<MemberId, i64> = HashMap::new();
        let mut breaks: HashMap<MemberId, BTreeMap<BreakKind, u32>> = HashMap::new();

        for c in self.store.checkins_between(group, window)? {
            members.insert(c.member);
        }
        for b in self.store.breaks_overlapping(group, window)? {
            if window.contains(b.start) {
                members.insert(b.member);
                *breaks.entry(b.member).or_default().entry(b.kind).or_default() += 1;
            }
        }
        for w in self.store.work_overlapping(group, window)? {
            members.insert(w.member);
            *work.entry(w.member).or_default() += window.clipped_minutes(w.start, w.end.unwrap_or(now));
        }

        let mut rows = members
            .into_iter()
            .map(|member| {
                let break_counts = BreakKind::ALL
                    .iter()
                    .map(|k| {
                        let n = breaks.get(&member).and_then(|m| m.get(k)).copied().unwrap_or(0);
                        (*k, n)
                    })
                    .collect();
                Ok(MemberRow {
                    member,
                    display_name: self.display_name(group, member)?,
                    work_minutes: work.get(&member).copied().unwrap_or(0),
                    break_counts,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        rows.sort_by(|a, b| {
            b.work_minutes
                .cmp(&a.work_minutes)
                .then(a.breaks(BreakKind::Toilet).cmp(&b.breaks(BreakKind::Toilet)))
                .then(a.breaks(BreakKind::Takeout).cmp(&b.breaks(BreakKind::Takeout)))
                .then_with(|| a.display_name.cmp(&b.display_name))
        });
        Ok(rows)
    }

    /// Check-in ranking since an instant, or for all time.
    pub fn leaderboard(
        &self,
        group: GroupId,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RankedMember>> {
        let mut per_member: BTreeMap<MemberId, u32> = BTreeMap::new();
        for c in self.store.checkins_since(group, since)? {
            *per_member.entry(c.member).or_default() += 1;
        }
        self.rank(group, per_member, limit)
    }

    pub fn member_stats(&self, group: GroupId, member: MemberId) -> Result<MemberStats> {
        let events = self.store.member_checkins(group, member)?;
        let last = events.last();
        Ok(MemberStats {
            member,
            display_name: last
                .map(|c| c.display_name.clone())
                .unwrap_or_else(|| member.to_string()),
            total_checkins: u32::try_from(events.len()).unwrap_or(u32::MAX),
            last_checkin: last.map(|c| c.at),
        })
    }

    /// Count desc, display name asc, truncated to `limit`.
    fn rank(
        &self,
        group: GroupId,
        counts: BTreeMap<MemberId, u32>,
        limit: usize,
    ) -> Result<Vec<RankedMember>> {
        let mut ranked = counts
            .into_iter()
            .map(|(member, count)| {
                Ok(RankedMember {
                    member,
                    display_name: self.display_name(group, member)?,
                    count,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        ranked.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.display_name.cmp(&b.display_name))
                .then(a.member.cmp(&b.member))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::day_bounds;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Tz;

    const G: GroupId = GroupId(5);

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Aggregator) {
        let store = Arc::new(MemoryStore::new());
        let agg = Aggregator::new(store.clone());
        (store, agg)
    }

    #[test]
    fn test_break_across_midnight_is_split() {
        let (store, agg) = setup();
        let b = store.insert_break(G, MemberId(1), BreakKind::Smoke, at(1, 23, 50)).unwrap();
        store.close_break(b.id, at(2, 0, 10)).unwrap();

        let day1 = agg
            .summarize_window(G, &day_bounds(Tz::UTC, at(1, 12, 0)), at(3, 0, 0), 5)
            .unwrap();
        let day2 = agg
            .summarize_window(G, &day_bounds(Tz::UTC, at(2, 12, 0)), at(3, 0, 0), 5)
            .unwrap();

        assert_eq!(day1.kind(BreakKind::Smoke), KindTotals { count: 1, minutes: 10 });
        // Started the day before: minutes only, no count.
        assert_eq!(day2.kind(BreakKind::Smoke), KindTotals { count: 0, minutes: 10 });
    }

    #[test]
    fn test_open_sessions_end_at_now() {
        let (store, agg) = setup();
        store.insert_work(G, MemberId(1), at(1, 8, 0)).unwrap();
        store.insert_break(G, MemberId(1), BreakKind::Toilet, at(1, 9, 0)).unwrap();

        let window = day_bounds(Tz::UTC, at(1, 12, 0));
        let summary = agg.summarize_window(G, &window, at(1, 9, 30), 5).unwrap();
        assert_eq!(summary.work_minutes, 90);
        assert_eq!(summary.kind(BreakKind::Toilet).minutes, 30);
    }

    #[test]
    fn test_top_checkins_ranked_by_count_then_name() {
        let (store, agg) = setup();
        store.add_checkin(G, MemberId(1), "Zed", at(1, 8, 0)).unwrap();
        store.add_checkin(G, MemberId(1), "Zed", at(1, 9, 0)).unwrap();
        store.add_checkin(G, MemberId(2), "Bao", at(1, 8, 0)).unwrap();
        store.add_checkin(G, MemberId(3), "Anh", at(1, 8, 0)).unwrap();

        let window = day_bounds(Tz::UTC, at(1, 12, 0));
        let summary = agg.summarize_window(G, &window, at(1, 12, 0), 2).unwrap();
        assert_eq!(summary.checkin_count, 3);
        let names: Vec<_> = summary.top_checkins.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["Zed", "Anh"]);
    }

    #[test]
    fn test_per_member_table_ordering() {
        let (store, agg) = setup();
        let window = day_bounds(Tz::UTC, at(1, 12, 0));

        // Long worker.
        let w = store.insert_work(G, MemberId(1), at(1, 8, 0)).unwrap();
        store.close_work(w.id, at(1, 16, 0)).unwrap();
        store.add_checkin(G, MemberId(1), "Long", at(1, 8, 0)).unwrap();

        // Equal work, more toilet breaks ranks lower.
        for (member, name, toilets) in [(2, "Two", 2), (3, "Three", 1)] {
            let w = store.insert_work(G, MemberId(member), at(1, 9, 0)).unwrap();
            store.close_work(w.id, at(1, 10, 0)).unwrap();
            store.add_checkin(G, MemberId(member), name, at(1, 9, 0)).unwrap();
            for i in 0..toilets {
                let b = store
                    .insert_break(G, MemberId(member), BreakKind::Toilet, at(1, 11, 0) + Duration::minutes(i * 10))
                    .unwrap();
                store.close_break(b.id, at(1, 11, 5) + Duration::minutes(i * 10)).unwrap();
            }
        }

        // Only a break; no check-in, so the name falls back to the id.
        store.insert_break(G, MemberId(9), BreakKind::Smoke, at(1, 13, 0)).unwrap();

        let rows = agg.per_member_table(G, &window, at(1, 14, 0)).unwrap();
        let order: Vec<_> = rows.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(order, vec!["Long", "Three", "Two", "9"]);
        assert_eq!(rows[0].work_minutes, 480);
        assert_eq!(rows[2].breaks(BreakKind::Toilet), 2);
        assert_eq!(rows[3].breaks(BreakKind::Smoke), 1);
    }

    #[test]
    fn test_leaderboard_and_member_stats() {
        let (store, agg) = setup();
        store.add_checkin(G, MemberId(1), "A", at(1, 8, 0)).unwrap();
        store.add_checkin(G, MemberId(1), "A2", at(2, 8, 0)).unwrap();
        store.add_checkin(G, MemberId(2), "B", at(2, 8, 0)).unwrap();

        let all = agg.leaderboard(G, None, 10).unwrap();
        assert_eq!(all[0].member, MemberId(1));
        assert_eq!(all[0].count, 2);
        assert_eq!(all[0].display_name, "A2");

        let recent = agg.leaderboard(G, Some(at(2, 0, 0)), 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|r| r.count == 1));

        let stats = agg.member_stats(G, MemberId(1)).unwrap();
        assert_eq!(stats.total_checkins, 2);
        assert_eq!(stats.last_checkin, Some(at(2, 8, 0)));

        let nobody = agg.member_stats(G, MemberId(77)).unwrap();
        assert_eq!(nobody.display_name, "77");
        assert!(nobody.last_checkin.is_none());
    }
}
