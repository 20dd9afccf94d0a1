use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::model::*;
use crate::policy::ClassKind;
use crate::timewindow;

use super::{Engine, EngineError};

impl Engine {
    pub async fn list_coaches(&self) -> Vec<CoachInfo> {
        let coach_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut coaches = Vec::with_capacity(coach_ids.len());
        for cid in coach_ids {
            let rs = match self.get_coach(&cid) {
                Some(rs) => rs,
                None => continue,
            };
            let guard = rs.read().await;
            coaches.push(CoachInfo {
                id: guard.id,
                name: guard.name.clone(),
                slot_count: guard.slots.len(),
                booking_count: guard.bookings.len(),
            });
        }
        coaches.sort_by_key(|c| c.id);
        coaches
    }

    /// A coach's advertised slots with expired ones filtered out. Expiry is
    /// lazy: the catalog may still physically hold stale slots until the
    /// background sweep prunes them, but no query ever shows one.
    pub async fn get_slots(
        &self,
        coach_id: Ulid,
        now: NaiveDateTime,
    ) -> Result<Vec<Slot>, EngineError> {
        let rs = match self.get_coach(&coach_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(guard
            .slots
            .iter()
            .filter(|s| !timewindow::is_expired(s.date, &s.time, now))
            .cloned()
            .collect())
    }

    pub async fn bookings_for_coach(&self, coach_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = match self.get_coach(&coach_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }

    pub async fn bookings_for_user(&self, user_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let mut out = Vec::new();
        let coach_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for cid in coach_ids {
            let rs = match self.get_coach(&cid) {
                Some(rs) => rs,
                None => continue,
            };
            let guard = rs.read().await;
            out.extend(guard.bookings.iter().filter(|b| b.user_id == user_id).cloned());
        }
        out.sort_by_key(|b| b.id);
        Ok(out)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        let coach_id = match self.get_coach_for_booking(&id) {
            Some(cid) => cid,
            None => return Ok(None),
        };
        let rs = match self.get_coach(&coach_id) {
            Some(rs) => rs,
            None => return Ok(None),
        };
        let guard = rs.read().await;
        Ok(guard.find_booking(id).cloned())
    }

    /// Occupancy of every live advertised slot, in one pass over the data.
    /// A slot is occupied iff its class is Exclusive and any live booking
    /// sits at the same (coach, date, time). Shared slots are never occupied.
    pub async fn project_occupancy(
        &self,
        now: NaiveDateTime,
    ) -> Result<HashMap<SlotKey, bool>, EngineError> {
        let mut taken: HashSet<(Ulid, NaiveDate, String)> = HashSet::new();
        let mut slots: Vec<(Ulid, Slot)> = Vec::new();

        let coach_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for cid in coach_ids {
            let rs = match self.get_coach(&cid) {
                Some(rs) => rs,
                None => continue,
            };
            let guard = rs.read().await;
            for b in &guard.bookings {
                if b.status.is_live() {
                    taken.insert((b.coach_id, b.date, b.time.clone()));
                }
            }
            for s in &guard.slots {
                if !timewindow::is_expired(s.date, &s.time, now) {
                    slots.push((guard.id, s.clone()));
                }
            }
        }

        let mut map = HashMap::with_capacity(slots.len());
        for (coach_id, slot) in slots {
            let occupied = self.policy.classify(&slot.class_type) == ClassKind::Exclusive
                && taken.contains(&(coach_id, slot.date, slot.time.clone()));
            map.insert(
                SlotKey {
                    coach_id,
                    date: slot.date,
                    time: slot.time,
                    class_type: slot.class_type,
                },
                occupied,
            );
        }
        Ok(map)
    }

    /// Availability listing, optionally for one coach, optionally overlaid
    /// with occupancy. Rows follow catalog order: coach id, then date, then
    /// window start.
    pub async fn coach_availability(
        &self,
        coach_id: Option<Ulid>,
        include_occupancy: bool,
        now: NaiveDateTime,
    ) -> Result<Vec<AvailabilityRow>, EngineError> {
        let occupancy = if include_occupancy {
            Some(self.project_occupancy(now).await?)
        } else {
            None
        };

        let mut coach_ids: Vec<Ulid> = match coach_id {
            Some(id) => vec![id],
            None => self.state.iter().map(|e| *e.key()).collect(),
        };
        coach_ids.sort();

        let mut rows = Vec::new();
        for cid in coach_ids {
            let rs = match self.get_coach(&cid) {
                Some(rs) => rs,
                None => continue,
            };
            let guard = rs.read().await;
            for slot in &guard.slots {
                if timewindow::is_expired(slot.date, &slot.time, now) {
                    continue;
                }
                let occupied = occupancy.as_ref().map(|m| {
                    let key = SlotKey {
                        coach_id: cid,
                        date: slot.date,
                        time: slot.time.clone(),
                        class_type: slot.class_type.clone(),
                    };
                    m.get(&key).copied().unwrap_or(false)
                });
                rows.push(AvailabilityRow {
                    coach_id: cid,
                    coach_name: guard.name.clone(),
                    date: slot.date,
                    time: slot.time.clone(),
                    class_type: slot.class_type.clone(),
                    occupied,
                });
            }
        }
        Ok(rows)
    }

    /// Derived package views for one user. Packages are never stored; the
    /// member bookings' shared fields are the grouping key. Status rolls up:
    /// all verified wins, then any pending, then any rejected, else unpaid.
    pub async fn package_view(&self, user_id: Ulid) -> Result<Vec<PackageView>, EngineError> {
        let bookings = self.bookings_for_user(user_id).await?;

        let mut groups: HashMap<(String, String, PackageFields), Vec<&Booking>> = HashMap::new();
        for b in &bookings {
            if let Some(ref fields) = b.package {
                groups
                    .entry((b.class_type.clone(), fields.package_type.clone(), fields.clone()))
                    .or_default()
                    .push(b);
            }
        }

        let mut views: Vec<PackageView> = groups
            .into_iter()
            .map(|((class_type, package_type, fields), members)| {
                let status = if members.iter().all(|b| b.status == PaymentStatus::Verified) {
                    PaymentStatus::Verified
                } else if members.iter().any(|b| b.status == PaymentStatus::Pending) {
                    PaymentStatus::Pending
                } else if members.iter().any(|b| b.status == PaymentStatus::Rejected) {
                    PaymentStatus::Rejected
                } else {
                    PaymentStatus::Unpaid
                };
                let mut booking_ids: Vec<Ulid> = members.iter().map(|b| b.id).collect();
                booking_ids.sort();
                PackageView {
                    user_id,
                    class_type,
                    package_type,
                    price: fields.price,
                    payment_date: fields.payment_date,
                    status,
                    booking_ids,
                }
            })
            .collect();
        views.sort_by(|a, b| {
            (&a.payment_date, &a.class_type, &a.package_type)
                .cmp(&(&b.payment_date, &b.class_type, &b.package_type))
        });
        Ok(views)
    }

    pub fn user_history(&self, user_id: Ulid) -> Vec<HistoryEntry> {
        self.user_histories
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub async fn coach_history(&self, coach_id: Ulid) -> Result<Vec<HistoryEntry>, EngineError> {
        let rs = match self.get_coach(&coach_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(guard.class_history.clone())
    }
}
