use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// One of the movement inputs an entity can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Input {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Input {
    pub const COUNT: usize = 4;
    pub const ALL: [Input; Input::COUNT] = [Input::Up, Input::Down, Input::Left, Input::Right];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputState {
    #[default]
    Released,
    Pressed,
}

/// The full input state of an entity for one tick, indexed by [`Input`].
///
/// Conceptually immutable once recorded for a tick; the prediction replay
/// depends on history entries never changing after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputStateVec {
    states: [InputState; Input::COUNT],
}

impl InputStateVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pressed(&self, input: Input) -> bool {
        self.states[input as usize] == InputState::Pressed
    }

    pub fn set(&mut self, input: Input, state: InputState) {
        self.states[input as usize] = state;
    }

    pub fn pressed(input: Input) -> Self {
        let mut states = Self::default();
        states.set(input, InputState::Pressed);
        states
    }

    pub fn release_all(&mut self) {
        self.states = [InputState::Released; Input::COUNT];
    }
}

impl Index<Input> for InputStateVec {
    type Output = InputState;

    fn index(&self, input: Input) -> &InputState {
        &self.states[input as usize]
    }
}

impl IndexMut<Input> for InputStateVec {
    fn index_mut(&mut self, input: Input) -> &mut InputState {
        &mut self.states[input as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_released() {
        let states = InputStateVec::new();
        for input in Input::ALL {
            assert_eq!(states[input], InputState::Released);
        }
    }

    #[test]
    fn set_and_query() {
        let mut states = InputStateVec::new();
        states.set(Input::Up, InputState::Pressed);

        assert!(states.is_pressed(Input::Up));
        assert!(!states.is_pressed(Input::Down));

        states.release_all();
        assert!(!states.is_pressed(Input::Up));
    }
}
