use crate::gtu::GtuSnapshot;
use crate::units::Time;
use crate::{GtuId, LaneId};
#[cfg(feature = "debug")]
use serde_json::json;

#[cfg(feature = "debug")]
thread_local!(
    static DEBUG_FRAME: std::cell::RefCell<Vec<serde_json::Value>> = Default::default();
);

#[allow(unused)]
pub fn debug_plan(snapshot: &GtuSnapshot) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "plan",
            "snapshot": snapshot,
        }))
    })
}

#[allow(unused)]
pub fn debug_lane_change(gtu: GtuId, from: LaneId, to: LaneId, time: Time) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "lane_change",
            "gtu": gtu,
            "from": from,
            "to": to,
            "time": time.si(),
        }))
    })
}

#[cfg(feature = "debug")]
pub fn take_debug_frame() -> serde_json::Value {
    json!(DEBUG_FRAME.with(|frame| frame.take()))
}
