//! Learned emission order and chunk partitioning.
//!
//! The opcode table works per chunk of functions, so both the emission
//! order and the chunk boundaries affect the encoded size. A small genetic
//! search varies the two, with fitness the negated total size. The AST is
//! never touched: only the function sequence is permuted for the trial
//! encoding and restored afterwards.

use anyhow::Result;
use log::debug;

use super::write_compressed;
use crate::ir::{Function, Module};

/// One candidate layout: a permutation of function indices, and the sizes
/// of consecutive chunks (each chunk gets its own opcode table).
#[derive(Clone, Debug)]
pub struct Choice {
    pub order: Vec<usize>,
    pub chunk_sizes: Vec<usize>,
    fitness: i64,
}

impl Choice {
    /// The identity layout: module order, one chunk of `chunk` functions
    /// apiece.
    pub fn identity(num_funcs: usize, chunk: usize) -> Choice {
        let mut chunk_sizes = vec![];
        let mut left = num_funcs;
        while left > chunk {
            chunk_sizes.push(chunk);
            left -= chunk;
        }
        if left > 0 || chunk_sizes.is_empty() {
            chunk_sizes.push(left);
        }
        Choice {
            order: (0..num_funcs).collect(),
            chunk_sizes,
            fitness: 0,
        }
    }

    pub fn fitness(&self) -> i64 {
        self.fitness
    }

    fn verify(&self) {
        let total: usize = self.chunk_sizes.iter().sum();
        assert_eq!(total, self.order.len());
    }
}

/// splitmix64; tiny, seedable, and deterministic across runs.
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Rng {
        Rng { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform in `0..n`; `n` must be nonzero.
    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    fn coin(&mut self) -> bool {
        self.next() & 1 == 1
    }
}

pub struct Generator<'m> {
    module: &'m mut Module,
    size: usize,
    rng: Rng,
}

impl<'m> Generator<'m> {
    pub fn new(module: &'m mut Module, seed: u64) -> Generator<'m> {
        let size = module.functions.len();
        Generator {
            module,
            size,
            rng: Rng::new(seed),
        }
    }

    pub fn make_random(&mut self) -> Result<Choice> {
        let size = self.size;
        if size == 0 {
            let mut choice = Choice {
                order: vec![],
                chunk_sizes: vec![],
                fitness: 0,
            };
            self.calc_fitness(&mut choice)?;
            return Ok(choice);
        }
        let mut order: Vec<usize> = (0..size).collect();
        // Fisher-Yates
        for i in (1..size).rev() {
            order.swap(i, self.rng.below(i + 1));
        }
        // pick a chunk count: usually all sizes, sometimes conservatively
        // small, sometimes absolutely small
        let num = if self.rng.coin() {
            (self.rng.below(size)).max(1)
        } else if self.rng.coin() {
            let a = self.rng.below(size).min(self.rng.below(size));
            let b = self.rng.below(size).min(self.rng.below(size));
            a.min(b).max(1)
        } else {
            size.min(1 + self.rng.below(8))
        };
        // uniform chunk sizes via randomly placed markers
        let mut markers: Vec<usize> = (0..num).map(|_| self.rng.below(size)).collect();
        markers.sort_unstable();
        markers.push(size + 1); // end buffer, no bounds check needed
        let mut chunk_sizes = vec![];
        let mut curr = 0usize;
        let mut next_marker = 0usize;
        for i in 0..size {
            curr += 1;
            if markers[next_marker] <= i {
                // duplicate markers advance one per element, so chunks stay
                // non-empty
                chunk_sizes.push(curr);
                curr = 0;
                next_marker += 1;
            }
        }
        if curr > 0 {
            chunk_sizes.push(curr);
        }
        let mut choice = Choice {
            order,
            chunk_sizes,
            fitness: 0,
        };
        self.calc_fitness(&mut choice)?;
        Ok(choice)
    }

    /// Mix two layouts: average each function's chunk index, then reuse one
    /// parent's order to lay functions out chunk by chunk.
    pub fn make_mixture(&mut self, left: &Choice, right: &Choice) -> Result<Choice> {
        let size = self.size;
        let mut merged = vec![0usize; size]; // function index -> summed chunk index
        add_chunk_indexes(left, &mut merged);
        add_chunk_indexes(right, &mut merged);
        let num_chunks = left.chunk_sizes.len().max(right.chunk_sizes.len());
        let mut per_chunk: Vec<Vec<usize>> = vec![vec![]; num_chunks];
        let mixer = if self.rng.coin() { left } else { right };
        for i in 0..size {
            let function_index = mixer.order[i];
            let chunk_index = merged[function_index] / 2;
            per_chunk[chunk_index].push(function_index);
        }
        let mut choice = Choice {
            order: vec![],
            chunk_sizes: vec![],
            fitness: 0,
        };
        for indexes in per_chunk {
            if indexes.is_empty() {
                continue;
            }
            choice.chunk_sizes.push(indexes.len());
            choice.order.extend(indexes);
        }
        self.calc_fitness(&mut choice)?;
        Ok(choice)
    }

    fn calc_fitness(&mut self, choice: &mut Choice) -> Result<()> {
        choice.verify();
        let bytes = write_with_choice(self.module, choice)?;
        choice.fitness = -(bytes.len() as i64);
        Ok(())
    }
}

fn add_chunk_indexes(choice: &Choice, merged: &mut [usize]) {
    let mut curr = 0usize;
    for (chunk, &chunk_size) in choice.chunk_sizes.iter().enumerate() {
        for _ in 0..chunk_size {
            merged[choice.order[curr]] += chunk;
            curr += 1;
        }
    }
}

/// Encode with a layout: permute the function sequence, emit compressed
/// with the layout's chunking, restore the original sequence.
pub fn write_with_choice(module: &mut Module, choice: &Choice) -> Result<Vec<u8>> {
    let original: Vec<Function> = std::mem::take(&mut module.functions);
    let mut slots: Vec<Option<Function>> = original.into_iter().map(Some).collect();
    let mut permuted = Vec::with_capacity(slots.len());
    for &i in &choice.order {
        let func = slots[i]
            .take()
            .unwrap_or_else(|| panic!("choice order is not a permutation"));
        permuted.push(func);
    }
    module.functions = permuted;

    let result = write_compressed(module, &choice.chunk_sizes);

    // restore
    let permuted: Vec<Function> = std::mem::take(&mut module.functions);
    let mut slots: Vec<Option<Function>> = (0..choice.order.len()).map(|_| None).collect();
    for (func, &i) in permuted.into_iter().zip(&choice.order) {
        slots[i] = Some(func);
    }
    let restored: Vec<Function> = slots
        .into_iter()
        .map(|s| s.unwrap_or_else(|| panic!("choice order is not a permutation")))
        .collect();
    module.functions = restored;

    result
}

/// Population-based search over layouts.
pub struct GeneticLearner<'m> {
    generator: Generator<'m>,
    population: Vec<Choice>,
}

impl<'m> GeneticLearner<'m> {
    pub fn new(mut generator: Generator<'m>, population_size: usize) -> Result<GeneticLearner<'m>> {
        let mut population = vec![Choice::identity(
            generator.size,
            generator.size.max(1).min(100),
        )];
        generator.calc_fitness(&mut population[0])?;
        while population.len() < population_size {
            population.push(generator.make_random()?);
        }
        let mut learner = GeneticLearner {
            generator,
            population,
        };
        learner.sort();
        Ok(learner)
    }

    fn sort(&mut self) {
        self.population.sort_by_key(|c| -c.fitness());
    }

    pub fn best(&self) -> &Choice {
        &self.population[0]
    }

    /// Keep the better half, refill with mixtures of surviving pairs and an
    /// occasional fresh random layout.
    pub fn run_generation(&mut self) -> Result<()> {
        let target = self.population.len();
        let keep = (target / 2).max(1);
        self.population.truncate(keep);
        while self.population.len() < target {
            let child = if self.generator.rng.below(8) == 0 {
                self.generator.make_random()?
            } else {
                let a = self.generator.rng.below(keep);
                let b = self.generator.rng.below(keep);
                let (left, right) = (self.population[a].clone(), self.population[b].clone());
                self.generator.make_mixture(&left, &right)?
            };
            self.population.push(child);
        }
        self.sort();
        Ok(())
    }
}

/// Run `generations` rounds of the search and emit using the best layout
/// found.
pub fn write_learned(
    module: &mut Module,
    generations: usize,
    population: usize,
    seed: u64,
) -> Result<Vec<u8>> {
    module.finalize_types();
    let generator = Generator::new(module, seed);
    let mut learner = GeneticLearner::new(generator, population.max(2))?;
    debug!(
        "initial best size {} over {} chunks",
        -learner.best().fitness(),
        learner.best().chunk_sizes.len()
    );
    for generation in 0..generations {
        learner.run_generation()?;
        debug!(
            "generation {}: best size {} [{} chunks]",
            generation,
            -learner.best().fitness(),
            learner.best().chunk_sizes.len()
        );
    }
    let best = learner.best().clone();
    write_with_choice(module, &best)
}
