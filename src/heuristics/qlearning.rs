//! Q-learning control of the BRKGA parameters.
//!
//! Each of the seven controlled parameters is a state; its actions are the
//! candidate values from [`ParameterSets`]. States form a fixed cycle, so the
//! update of one state bootstraps on the greedy action of the next.

use crate::config::ParameterSets;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const NB_STATES: usize = 7;

/// Parameter controlled by a state of the Q-table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parameter {
    Population,
    Elite,
    Mutant,
    Inheritance,
    Epsilon,
    LearningRate,
    Discount,
}

impl Parameter {
    pub const ALL: [Parameter; NB_STATES] = [
        Parameter::Population,
        Parameter::Elite,
        Parameter::Mutant,
        Parameter::Inheritance,
        Parameter::Epsilon,
        Parameter::LearningRate,
        Parameter::Discount,
    ];

    pub fn state(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Parameter::Population => "p",
            Parameter::Elite => "pe",
            Parameter::Mutant => "pm",
            Parameter::Inheritance => "rhoe",
            Parameter::Epsilon => "epsilon",
            Parameter::LearningRate => "lf",
            Parameter::Discount => "df",
        }
    }
}

/// One action of a state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QEntry {
    /// Parameter value this action sets
    pub value: f64,
    /// Learned quality
    pub quality: f64,
    /// Times the action was taken
    pub visits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    pub rows: Vec<Vec<QEntry>>,
}

impl QTable {
    pub fn new(sets: &ParameterSets) -> Self {
        let row = |values: Vec<f64>| -> Vec<QEntry> {
            values
                .into_iter()
                .map(|value| QEntry {
                    value,
                    quality: 0.0,
                    visits: 0,
                })
                .collect()
        };
        let rows = vec![
            row(sets.population.iter().map(|&p| p as f64).collect()),
            row(sets.elite.clone()),
            row(sets.mutant.clone()),
            row(sets.inheritance.clone()),
            row(sets.epsilon.clone()),
            row(sets.learning_rate.clone()),
            row(sets.discount.clone()),
        ];
        QTable { rows }
    }

    pub fn row(&self, parameter: Parameter) -> &[QEntry] {
        &self.rows[parameter.state()]
    }

    /// Best action of state `s`, ties broken uniformly at random
    pub fn greedy_action<R: Rng + ?Sized>(&self, s: usize, rng: &mut R) -> usize {
        let row = &self.rows[s];
        let best = row.iter().map(|e| e.quality).fold(f64::NEG_INFINITY, f64::max);
        let ties: Vec<usize> = (0..row.len()).filter(|&a| row[a].quality == best).collect();
        ties.choose(rng).copied().unwrap_or(0)
    }
}

impl fmt::Display for QTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (parameter, row) in Parameter::ALL.iter().zip(&self.rows) {
            write!(f, "{:>8}:", parameter.name())?;
            for entry in row {
                write!(f, " [{:.2} q={:.3} k={}]", entry.value, entry.quality, entry.visits)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Parameter values chosen for one generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub population: usize,
    pub elite: f64,
    pub mutant: f64,
    pub inheritance: f64,
    pub epsilon: f64,
    pub learning_rate: f64,
    pub discount: f64,
}

impl GenerationParameters {
    /// Number of elites in a population of `p` (between 1 and `p - 1`)
    pub fn elite_count(&self, p: usize) -> usize {
        ((p as f64 * self.elite).floor() as usize).clamp(1, p.saturating_sub(1).max(1))
    }

    /// Number of mutants, leaving at least one crossover slot
    pub fn mutant_count(&self, p: usize, elite: usize) -> usize {
        ((p as f64 * self.mutant).floor() as usize).min(p.saturating_sub(elite + 1))
    }
}

/// Epsilon-greedy controller over the chained Q-table
#[derive(Debug, Clone)]
pub struct QLearningController {
    table: QTable,
    /// Action taken in every state
    actions: [usize; NB_STATES],
    /// Greedy action of every state at the last choice
    greedy: [usize; NB_STATES],
    /// Generations before greedy actions are allowed
    warmup: usize,
}

impl QLearningController {
    pub fn new(sets: &ParameterSets, warmup: usize) -> Self {
        QLearningController {
            table: QTable::new(sets),
            actions: [0; NB_STATES],
            greedy: [0; NB_STATES],
            warmup,
        }
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn actions(&self) -> &[usize; NB_STATES] {
        &self.actions
    }

    pub fn into_table(self) -> QTable {
        self.table
    }

    fn value(&self, parameter: Parameter) -> f64 {
        let s = parameter.state();
        self.table.rows[s][self.actions[s]].value
    }

    /// Values of the actions currently taken
    pub fn parameters(&self) -> GenerationParameters {
        GenerationParameters {
            population: self.value(Parameter::Population) as usize,
            elite: self.value(Parameter::Elite),
            mutant: self.value(Parameter::Mutant),
            inheritance: self.value(Parameter::Inheritance),
            epsilon: self.value(Parameter::Epsilon),
            learning_rate: self.value(Parameter::LearningRate),
            discount: self.value(Parameter::Discount),
        }
    }

    /// Choose the action of every state for `generation`.
    ///
    /// With probability epsilon (once past the warmup) the greedy action is
    /// taken, otherwise a random action different from the current one.
    pub fn choose<R: Rng + ?Sized>(&mut self, generation: usize, rng: &mut R) -> GenerationParameters {
        let epsilon = self.value(Parameter::Epsilon);
        for s in 0..NB_STATES {
            self.greedy[s] = self.table.greedy_action(s, rng);
            let nb_actions = self.table.rows[s].len();

            let action = if rng.gen::<f64>() < epsilon && generation > self.warmup {
                self.greedy[s]
            } else if nb_actions > 1 {
                let draw = rng.gen_range(0..nb_actions - 1);
                if draw >= self.actions[s] {
                    draw + 1
                } else {
                    draw
                }
            } else {
                0
            };
            self.actions[s] = action;
            self.table.rows[s][action].visits += 1;
        }
        self.parameters()
    }

    /// Update the taken actions with `reward`.
    ///
    /// Qualities only move when `reward > 0`. The last state bootstraps on a
    /// zero terminal value.
    pub fn update(&mut self, reward: f64) {
        if reward <= 0.0 {
            return;
        }
        let lf = self.value(Parameter::LearningRate);
        let df = self.value(Parameter::Discount);
        for s in 0..NB_STATES {
            let next = if s + 1 < NB_STATES {
                self.table.rows[s + 1][self.greedy[s + 1]].quality
            } else {
                0.0
            };
            let entry = &mut self.table.rows[s][self.actions[s]];
            entry.quality += lf * (reward + df * next - entry.quality);
        }
    }
}
