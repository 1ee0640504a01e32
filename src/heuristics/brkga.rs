//! Biased random-key genetic algorithm with Q-learning parameter control.
//!
//! The [`OptimizerContext`] owns everything one run mutates: the population
//! and its next-generation buffer, the Q-learning controller, the run RNG and
//! the best-known solution. Per-individual work runs on a rayon pool; every
//! parallel slot draws from its own `ChaCha8Rng` seeded on the driver thread,
//! so a run is reproducible for a given seed whatever the thread count.

use crate::config::SolverConfig;
use crate::error::SolverError;
use crate::evaluation::{decode, split_objective};
use crate::heuristics::community::detect_communities;
use crate::heuristics::local_search::{LocalSearch, Rvnd};
use crate::heuristics::qlearning::{GenerationParameters, QLearningController, QTable};
use crate::problem::Problem;
use crate::solution::{Chromosome, Solution};
use ordered_float::OrderedFloat;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Instant;

/// Outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub seed: u64,
    /// Best solution found, objective terms split
    pub best: Solution,
    /// Seconds until the best solution was found
    pub time_to_best: f64,
    /// Seconds of the whole run
    pub total_time: f64,
    pub generations: usize,
    pub restarts: usize,
    /// Number of RVND applications
    pub local_search_calls: usize,
    pub q_table: QTable,
}

#[derive(Debug)]
struct BestKnown {
    solution: Option<Solution>,
    found_at: f64,
}

/// Replace the best-known solution when `candidate` is strictly better.
fn offer(best: &Mutex<BestKnown>, start: Instant, candidate: &Solution) {
    let mut best = best.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let improves = best
        .solution
        .as_ref()
        .map_or(true, |current| candidate.objective < current.objective);
    if improves {
        best.solution = Some(candidate.clone());
        best.found_at = start.elapsed().as_secs_f64();
    }
}

/// Child of two parents: each key comes from the elite parent with probability `rhoe`.
fn biased_crossover<R: Rng + ?Sized>(elite: &Chromosome, other: &Chromosome, rhoe: f64, rng: &mut R) -> Chromosome {
    let genes = elite
        .genes
        .iter()
        .zip(&other.genes)
        .map(|(e, o)| if rng.gen::<f64>() < rhoe { *e } else { *o })
        .collect();
    Chromosome { genes }
}

fn sort_population(population: &mut [Solution]) {
    population.sort_by_key(|s| OrderedFloat(s.objective));
}

/// Mutable state of one optimization run
pub struct OptimizerContext<'a> {
    problem: &'a Problem,
    config: &'a SolverConfig,
    seed: u64,
    rng: ChaCha8Rng,
    pool: ThreadPool,
    rvnd: Rvnd,
    controller: QLearningController,
    population: Vec<Solution>,
    offspring: Vec<Solution>,
    best: Mutex<BestKnown>,
    start: Instant,
    generation: usize,
    best_generation: usize,
    best_fitness: f64,
    stagnation: usize,
    restarts: usize,
    local_search_calls: usize,
}

impl<'a> OptimizerContext<'a> {
    pub fn new(problem: &'a Problem, config: &'a SolverConfig, seed: u64) -> Result<Self, SolverError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new().num_threads(config.run.max_threads).build()?;
        Ok(OptimizerContext {
            problem,
            config,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pool,
            rvnd: Rvnd::with_standard_operators(),
            controller: QLearningController::new(&config.parameters, config.search.greedy_warmup),
            population: Vec::new(),
            offspring: Vec::new(),
            best: Mutex::new(BestKnown {
                solution: None,
                found_at: 0.0,
            }),
            start: Instant::now(),
            generation: 0,
            best_generation: 0,
            best_fitness: f64::INFINITY,
            stagnation: 0,
            restarts: 0,
            local_search_calls: 0,
        })
    }

    fn draw_seeds(&mut self, count: usize) -> Vec<u64> {
        (0..count).map(|_| self.rng.gen()).collect()
    }

    /// Decode `count` random chromosomes in parallel.
    fn random_individuals(&mut self, count: usize) -> Vec<Solution> {
        let seeds = self.draw_seeds(count);
        let problem = self.problem;
        let best = &self.best;
        let start = self.start;
        self.pool.install(|| {
            seeds
                .par_iter()
                .map(|&seed| {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    let solution = decode(problem, Chromosome::random(problem, &mut rng));
                    offer(best, start, &solution);
                    solution
                })
                .collect()
        })
    }

    /// Truncate the sorted tail or append random individuals.
    fn resize_population(&mut self, size: usize) {
        let current = self.population.len();
        if size < current {
            self.population.truncate(size);
        } else if size > current {
            let extra = self.random_individuals(size - current);
            self.population.extend(extra);
            sort_population(&mut self.population);
        }
    }

    /// Fill the next generation and swap it in; returns the best crossover objective.
    fn evolve(&mut self, params: &GenerationParameters) -> f64 {
        let p = self.population.len();
        let elite = params.elite_count(p);
        let mutants = params.mutant_count(p, elite);
        let crossover_end = p - mutants;
        let rhoe = params.inheritance;

        self.offspring.clear();
        self.offspring.extend(self.population[..elite].iter().cloned());
        self.offspring.resize_with(p, Solution::default);

        let seeds = self.draw_seeds(p - elite);
        let problem = self.problem;
        let population = &self.population;
        let offspring = &mut self.offspring;
        let best = &self.best;
        let start = self.start;

        self.pool.install(|| {
            offspring[elite..]
                .par_iter_mut()
                .zip(seeds.par_iter())
                .enumerate()
                .for_each(|(offset, (slot, &seed))| {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    let chromosome = if elite + offset < crossover_end {
                        let a = &population[rng.gen_range(0..elite)].chromosome;
                        let b = &population[rng.gen_range(elite..p)].chromosome;
                        biased_crossover(a, b, rhoe, &mut rng)
                    } else {
                        Chromosome::random(problem, &mut rng)
                    };
                    *slot = decode(problem, chromosome);
                    offer(best, start, slot);
                });
        });

        let best_offspring = self.offspring[elite..crossover_end]
            .iter()
            .map(|s| s.objective)
            .fold(f64::INFINITY, f64::min);

        std::mem::swap(&mut self.population, &mut self.offspring);
        sort_population(&mut self.population);
        best_offspring
    }

    /// Reward of the generation: `1 + |relative gain|` on a new best fitness, else 0.
    fn reward(&mut self, best_offspring: f64) -> f64 {
        if best_offspring < self.best_fitness {
            let gain = if self.best_fitness.is_finite() && self.best_fitness != 0.0 {
                ((best_offspring - self.best_fitness) / self.best_fitness).abs()
            } else {
                0.0
            };
            self.best_fitness = best_offspring;
            self.best_generation = self.generation;
            self.stagnation = 0;
            1.0 + gain
        } else {
            self.stagnation += 1;
            0.0
        }
    }

    /// Apply RVND to the promising member of every elite community.
    fn local_search(&mut self, elite: usize) {
        let nb_keys = 2 * self.problem.nb_users + self.problem.nb_vehicles();
        let promising = detect_communities(
            &mut self.population[..elite],
            &self.config.search,
            nb_keys,
            &mut self.rng,
        );
        let seeds = self.draw_seeds(promising.len());

        let problem = self.problem;
        let population = &self.population;
        let rvnd = &self.rvnd;
        let best = &self.best;
        let start = self.start;
        self.pool.install(|| {
            promising.par_iter().zip(seeds.par_iter()).for_each(|(&i, &seed)| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut candidate = population[i].clone();
                rvnd.improve(problem, &mut candidate, &mut rng);
                offer(best, start, &candidate);
            });
        });

        for &i in &promising {
            self.population[i].local_searched = true;
        }
        self.local_search_calls += promising.len();
    }

    fn restart(&mut self) {
        self.best_generation = self.generation;
        self.population = self.random_individuals(self.population.len());
        sort_population(&mut self.population);
        self.best_fitness = self.population[0].objective;
        self.restarts += 1;
        log::info!(
            "Seed {}: restart at generation {} (population best {:.2})",
            self.seed,
            self.generation,
            self.best_fitness
        );
    }

    fn should_stop(&self) -> bool {
        let out_of_time = self.start.elapsed().as_secs_f64() >= self.config.run.max_time;
        let out_of_generations = self
            .config
            .run
            .max_generations
            .map_or(false, |max| self.generation >= max);
        out_of_time || out_of_generations
    }

    /// Run the evolutionary loop until the time or generation budget is spent.
    pub fn run(mut self) -> Result<RunResult, SolverError> {
        let run = &self.config.run;
        let (debug, local_search_enabled) = (run.debug, run.local_search);
        let (stagnation_trigger, restart_after) = (
            self.config.search.stagnation_trigger,
            self.config.search.restart_after,
        );
        self.start = Instant::now();

        let initial_size = self.config.parameters.max_population();
        self.population = self.random_individuals(initial_size);
        sort_population(&mut self.population);
        self.best_fitness = self.population.first().map_or(f64::INFINITY, |s| s.objective);

        // at least one generation runs, the budget is polled after each one
        loop {
            self.generation += 1;
            let params = self.controller.choose(self.generation, &mut self.rng);
            self.resize_population(params.population);

            let best_offspring = self.evolve(&params);
            let reward = self.reward(best_offspring);
            self.controller.update(reward);

            if local_search_enabled && (reward >= 1.0 || self.stagnation > stagnation_trigger) {
                self.stagnation = 0;
                let elite = params.elite_count(self.population.len());
                self.local_search(elite);
            }

            if debug {
                log::debug!(
                    "gen {:>5} | p {:>4} pe {:.2} pm {:.2} rhoe {:.2} | best {:.2} | reward {:.3}",
                    self.generation,
                    self.population.len(),
                    params.elite,
                    params.mutant,
                    params.inheritance,
                    self.best_fitness,
                    reward
                );
            }

            if self.generation - self.best_generation > restart_after {
                self.restart();
            }

            if self.should_stop() {
                break;
            }
        }

        let total_time = self.start.elapsed().as_secs_f64();
        if debug {
            log::debug!("Final Q-table (seed {}):\n{}", self.seed, self.controller.table());
        }

        let best = self.best.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut solution = best.solution.ok_or(SolverError::NoSolution)?;
        if solution.scheduled {
            split_objective(self.problem, &mut solution);
        }

        log::info!(
            "Seed {}: best {:.2} after {:.2}s, {} generations, {} restarts",
            self.seed,
            solution.objective,
            best.found_at,
            self.generation,
            self.restarts
        );

        Ok(RunResult {
            seed: self.seed,
            best: solution,
            time_to_best: best.found_at,
            total_time,
            generations: self.generation,
            restarts: self.restarts,
            local_search_calls: self.local_search_calls,
            q_table: self.controller.into_table(),
        })
    }
}

/// Run the optimizer once with `seed`.
pub fn solve(problem: &Problem, config: &SolverConfig, seed: u64) -> Result<RunResult, SolverError> {
    OptimizerContext::new(problem, config, seed)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParameterSets;
    use crate::evaluation::objective;
    use crate::fixtures;

    fn small_config(threads: usize, generations: usize) -> SolverConfig {
        let mut config = SolverConfig::default();
        config.run.max_time = 3600.0;
        config.run.max_threads = threads;
        config.run.max_generations = Some(generations);
        config.parameters = ParameterSets {
            population: vec![12, 20],
            ..ParameterSets::default()
        };
        config
    }

    #[test]
    fn test_biased_crossover_takes_keys_from_parents() {
        let problem = fixtures::small_fleet();
        let a = Chromosome::from_keys(&problem, &[0.1; 11]);
        let b = Chromosome::from_keys(&problem, &[0.9; 11]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let child = biased_crossover(&a, &b, 1.0, &mut rng);
        assert_eq!(child, a);
        let child = biased_crossover(&a, &b, 0.0, &mut rng);
        assert_eq!(child, b);
        let child = biased_crossover(&a, &b, 0.7, &mut rng);
        assert!(child.is_consistent(&problem));
        assert!(child.keys().all(|k| k == 0.1 || k == 0.9));
    }

    #[test]
    fn test_run_is_deterministic() {
        let problem = fixtures::small_fleet();
        let config = small_config(1, 15);

        let first = solve(&problem, &config, 1).unwrap();
        let second = solve(&problem, &config, 1).unwrap();
        assert_eq!(first.generations, 15);
        assert_eq!(first.best.objective.to_bits(), second.best.objective.to_bits());
        assert_eq!(first.best.chromosome, second.best.chromosome);
        assert_eq!(first.q_table, second.q_table);

        let parallel = solve(&problem, &small_config(2, 15), 1).unwrap();
        assert_eq!(first.best.objective.to_bits(), parallel.best.objective.to_bits());
        assert_eq!(first.q_table, parallel.q_table);
    }

    #[test]
    fn test_best_solution_is_consistent() {
        let problem = fixtures::small_fleet();
        let result = solve(&problem, &small_config(1, 20), 3).unwrap();
        let best = &result.best;

        assert!(best.chromosome.is_consistent(&problem));
        assert!(result.time_to_best <= result.total_time);
        if best.scheduled {
            assert!((objective(&problem, best) - best.objective).abs() < 1e-9);
            let [w0, w1, w2] = problem.weights;
            let terms = best.terms;
            let expected = w0 * terms.trt + w1 * terms.ert + w2 * terms.cc + 10_000.0 * terms.violations as f64;
            assert!((expected - best.objective).abs() < 1e-6);
        }
    }

    #[test]
    fn test_local_search_switch() {
        let problem = fixtures::small_fleet();
        let mut config = small_config(1, 10);
        config.run.local_search = false;
        let result = solve(&problem, &config, 2).unwrap();
        assert_eq!(result.local_search_calls, 0);

        config.run.local_search = true;
        let result = solve(&problem, &config, 2).unwrap();
        assert!(result.local_search_calls > 0);
    }

    #[test]
    fn test_restart_on_stagnation() {
        let problem = fixtures::small_fleet();
        let mut config = small_config(1, 30);
        config.search.restart_after = 0;
        let result = solve(&problem, &config, 4).unwrap();
        assert!(result.restarts > 0);
        assert_eq!(result.generations, 30);
    }

    #[test]
    fn test_spent_time_budget_still_runs_one_generation() {
        let problem = fixtures::single_request();
        let mut config = small_config(1, 5);
        config.run.max_time = 0.0;
        config.parameters.population = vec![10];
        let result = solve(&problem, &config, 1).unwrap();
        assert_eq!(result.generations, 1);
        assert!(result.best.objective.is_finite());
        assert!(result.time_to_best <= result.total_time);
    }

    #[test]
    fn test_generation_limit_is_exact() {
        let problem = fixtures::single_request();
        let config = small_config(1, 1);
        let result = solve(&problem, &config, 2).unwrap();
        assert_eq!(result.generations, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let problem = fixtures::small_fleet();
        let mut config = small_config(1, 5);
        config.run.max_threads = 0;
        assert!(matches!(solve(&problem, &config, 1), Err(SolverError::Config(_))));
    }
}
