//! Conversion of a consolidated timeline into per-hole motion steps.

use crate::config::PuncherConfig;
use crate::error::{PuncherError, Result};
use crate::motion::MotionStep;
use crate::music::{Keyboard, NoteTimeline};

/// Plan one motion step per hole, starting with the punch at `start`.
///
/// The holes of a chord are visited in row order, starting from whichever end
/// of the chord is nearer. Only the first hole of an event carries the feed.
/// Steps that would not move either axis are left out.
pub fn plan_steps(
    timeline: &NoteTimeline,
    keyboard: &Keyboard,
    config: &PuncherConfig,
    start: i64,
) -> Result<Vec<MotionStep>> {
    let mut position = start;
    let mut steps = Vec::new();
    for (index, event) in timeline.events().iter().enumerate() {
        if event.is_rest() {
            return Err(PuncherError::EmptyEvent { index });
        }
        let mut targets = event
            .notes
            .iter()
            .map(|&note| Ok(config.row_position(keyboard.get_index(note)?)))
            .collect::<Result<Vec<i64>>>()?;
        targets.sort_unstable();

        let (first, last) = (targets[0], targets[targets.len() - 1]);
        if (position - last).abs() < (position - first).abs() {
            targets.reverse();
        }

        let mut feed = config.feed_for(event.delay);
        for target in targets {
            let step = MotionStep::new(feed, target - position);
            if !step.is_zero() {
                steps.push(step);
            }
            position = target;
            feed = 0;
        }
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::NoteEvent;

    fn setup() -> (Keyboard, PuncherConfig) {
        let config = PuncherConfig {
            keyboard: vec![60, 62, 64, 65, 67, 69, 71, 72],
            row0: 100,
            tone_steps: 10.0,
            feed_steps: 100.0,
            ..PuncherConfig::default()
        };
        (config.build_keyboard().unwrap(), config)
    }

    #[test]
    fn single_notes() {
        let (keyboard, config) = setup();
        let timeline = NoteTimeline::new(vec![
            NoteEvent::new(0.0, [60]),
            NoteEvent::new(0.5, [64]),
            NoteEvent::new(0.25, [64]),
        ]);
        let steps = plan_steps(&timeline, &keyboard, &config, 0).unwrap();
        assert_eq!(
            steps,
            vec![
                MotionStep::new(0, 100),
                MotionStep::new(50, 20),
                MotionStep::new(25, 0),
            ]
        );
    }

    #[test]
    fn chord_starts_at_nearest_end() {
        let (keyboard, config) = setup();
        // rows 0, 2 and 7 at 100, 120 and 170
        let chord = NoteTimeline::new(vec![NoteEvent::new(1.0, [60, 64, 72])]);

        let from_below = plan_steps(&chord, &keyboard, &config, 90).unwrap();
        assert_eq!(
            from_below,
            vec![
                MotionStep::new(100, 10),
                MotionStep::new(0, 20),
                MotionStep::new(0, 50),
            ]
        );

        let from_above = plan_steps(&chord, &keyboard, &config, 200).unwrap();
        assert_eq!(
            from_above,
            vec![
                MotionStep::new(100, -30),
                MotionStep::new(0, -50),
                MotionStep::new(0, -20),
            ]
        );
    }

    #[test]
    fn equal_distance_goes_upwards() {
        let (keyboard, config) = setup();
        let chord = NoteTimeline::new(vec![NoteEvent::new(0.0, [60, 62])]);
        let steps = plan_steps(&chord, &keyboard, &config, 105).unwrap();
        assert_eq!(steps, vec![MotionStep::new(0, -5), MotionStep::new(0, 10)]);
    }

    #[test]
    fn zero_steps_are_elided() {
        let (keyboard, config) = setup();
        let timeline = NoteTimeline::new(vec![NoteEvent::new(0.0, [60])]);
        assert!(plan_steps(&timeline, &keyboard, &config, 100)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn empty_event_is_rejected() {
        let (keyboard, config) = setup();
        let timeline = NoteTimeline::new(vec![NoteEvent::new(1.0, [60]), NoteEvent::rest(1.0)]);
        assert!(matches!(
            plan_steps(&timeline, &keyboard, &config, 0),
            Err(PuncherError::EmptyEvent { index: 1 })
        ));
    }

    #[test]
    fn unknown_note_is_rejected() {
        let (keyboard, config) = setup();
        let timeline = NoteTimeline::new(vec![NoteEvent::new(1.0, [61])]);
        assert!(matches!(
            plan_steps(&timeline, &keyboard, &config, 0),
            Err(PuncherError::UnknownPitch(61))
        ));
    }

    #[test]
    fn fractional_row_spacing_rounds_per_row() {
        let (keyboard, mut config) = setup();
        config.tone_steps = 12.5;
        let timeline = NoteTimeline::new(vec![NoteEvent::new(0.0, [62]), NoteEvent::new(0.0, [64])]);
        let steps = plan_steps(&timeline, &keyboard, &config, 100).unwrap();
        // 12.5 rounds to 13, 25 stays 25
        assert_eq!(steps, vec![MotionStep::new(0, 13), MotionStep::new(0, 12)]);
    }
}
