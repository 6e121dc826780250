use crate::models::Step;
use crate::reorder::Direction;

/// StepList
///
/// Authoring buffer for the instruction steps of one sub-module.
///
/// `Step::order` is treated as derived data: every structural change (insert, move,
/// remove) recomputes it as `position + 1` for the whole list, so the field can never
/// drift from the array position. The list is persisted as a whole through
/// `Repository::replace_sub_module_steps`; there is no per-step persistence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepList {
    steps: Vec<Step>,
}

impl StepList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn as_slice(&self) -> &[Step] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    /// Appends an empty step at the end.
    pub fn push_empty(&mut self) {
        self.steps.push(Step::empty());
        self.renumber();
    }

    /// insert_after
    ///
    /// Inserts an empty step right after `index`, or at the head when `index` is `None`.
    /// An index past the end appends.
    pub fn insert_after(&mut self, index: Option<usize>) {
        let at = match index {
            Some(i) => (i + 1).min(self.steps.len()),
            None => 0,
        };
        self.steps.insert(at, Step::empty());
        self.renumber();
    }

    /// Swaps the step with its neighbour. No-op at the first/last position or for an
    /// out-of-range index.
    pub fn move_step(&mut self, index: usize, direction: Direction) {
        if index >= self.steps.len() {
            return;
        }
        match direction {
            Direction::Up if index > 0 => self.steps.swap(index, index - 1),
            Direction::Down if index + 1 < self.steps.len() => self.steps.swap(index, index + 1),
            _ => return,
        }
        self.renumber();
    }

    /// Removes and returns the step at `index`, renumbering the rest from 1.
    pub fn remove_step(&mut self, index: usize) -> Option<Step> {
        if index >= self.steps.len() {
            return None;
        }
        let removed = self.steps.remove(index);
        self.renumber();
        Some(removed)
    }

    pub fn set_description(&mut self, index: usize, description: impl Into<String>) -> bool {
        match self.steps.get_mut(index) {
            Some(step) => {
                step.description = description.into();
                true
            }
            None => false,
        }
    }

    pub fn set_image(&mut self, index: usize, image_path: impl Into<String>) -> bool {
        match self.steps.get_mut(index) {
            Some(step) => {
                step.image_path = Some(image_path.into());
                true
            }
            None => false,
        }
    }

    pub fn clear_image(&mut self, index: usize) -> bool {
        match self.steps.get_mut(index) {
            Some(step) => {
                step.image_path = None;
                true
            }
            None => false,
        }
    }

    fn renumber(&mut self) {
        for (position, step) in self.steps.iter_mut().enumerate() {
            step.order = position as u32 + 1;
        }
    }
}

/// Builds a list from steps received from a client or from storage. Incoming `order`
/// values are ignored: the array position wins, and blank image paths are dropped.
impl From<Vec<Step>> for StepList {
    fn from(steps: Vec<Step>) -> Self {
        let mut list = Self {
            steps: steps
                .into_iter()
                .map(|mut step| {
                    step.image_path = step.image_path.filter(|path| !path.trim().is_empty());
                    step
                })
                .collect(),
        };
        list.renumber();
        list
    }
}
