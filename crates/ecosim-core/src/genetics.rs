//! Reproduction and trait mutation.
//!
//! Offspring traits are the arithmetic mean of the parents', each trait then
//! perturbed with probability `mutation_chance` by a uniform offset bounded
//! by `mutation_impact` times the trait magnitude.

use crate::config::{SpeciesConfig, WorldConfig};
use crate::entity::{Creature, Gender, Traits};
use rand::Rng;
use rand::rngs::SmallRng;
use std::time::Instant;

/// An offspring rolled at conception but not yet registered into the world.
#[derive(Debug, Clone)]
pub struct CreatureSeed {
    pub gender: Gender,
    pub generation: u32,
    pub traits: Traits,
}

/// The brood a mated female carries through gestation.
#[derive(Debug, Clone)]
pub struct Litter {
    pub children: Vec<CreatureSeed>,
    pub conceived_at: Instant,
}

fn blend_trait(a: f64, b: f64, chance: f64, impact: f64, rng: &mut SmallRng) -> f64 {
    let mean = (a + b) / 2.0;
    if chance > 0.0 && impact > 0.0 && rng.random_bool(chance) {
        let offset = rng.random_range(-impact..=impact) * mean;
        (mean + offset).max(f64::MIN_POSITIVE)
    } else {
        mean
    }
}

/// Blend two parents' traits under the configured mutation roll.
#[must_use]
pub fn blend(a: &Traits, b: &Traits, chance: f64, impact: f64, rng: &mut SmallRng) -> Traits {
    Traits {
        max_health: blend_trait(a.max_health, b.max_health, chance, impact, rng),
        max_energy: blend_trait(a.max_energy, b.max_energy, chance, impact, rng),
        sight_range: blend_trait(a.sight_range, b.sight_range, chance, impact, rng),
        interaction_range: blend_trait(
            a.interaction_range,
            b.interaction_range,
            chance,
            impact,
            rng,
        ),
        movement_speed: blend_trait(a.movement_speed, b.movement_speed, chance, impact, rng),
    }
}

/// Roll the full litter for a completed mating interaction.
///
/// Litter size is uniform in `[min_children, max_children]`; offspring gender
/// is uniform; generation is `max(parents) + 1`.
#[must_use]
pub fn conceive(
    mother: &Creature,
    father: &Creature,
    config: &WorldConfig,
    species: &SpeciesConfig,
    rng: &mut SmallRng,
    now: Instant,
) -> Litter {
    let count = rng.random_range(species.min_children..=species.max_children);
    let generation = mother.generation.max(father.generation) + 1;
    let children = (0..count)
        .map(|_| CreatureSeed {
            gender: Gender::roll(rng),
            generation,
            traits: blend(
                &mother.traits,
                &father.traits,
                config.mutation_chance,
                config.mutation_impact,
                rng,
            ),
        })
        .collect();
    Litter {
        children,
        conceived_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Species;
    use rand::SeedableRng;

    fn parents() -> (Creature, Creature) {
        let a = Traits {
            max_health: 40.0,
            max_energy: 60.0,
            sight_range: 80.0,
            interaction_range: 8.0,
            movement_speed: 6.0,
        };
        let b = Traits {
            max_health: 20.0,
            max_energy: 30.0,
            sight_range: 40.0,
            interaction_range: 4.0,
            movement_speed: 4.0,
        };
        (
            Creature::new(Species::Herbivore, Gender::Female, 2, a),
            Creature::new(Species::Herbivore, Gender::Male, 5, b),
        )
    }

    #[test]
    fn zero_chance_yields_exact_parental_mean() {
        let (mother, father) = parents();
        let mut rng = SmallRng::seed_from_u64(1);
        let child = blend(&mother.traits, &father.traits, 0.0, 0.5, &mut rng);
        assert_eq!(child.max_health, 30.0);
        assert_eq!(child.max_energy, 45.0);
        assert_eq!(child.sight_range, 60.0);
        assert_eq!(child.interaction_range, 6.0);
        assert_eq!(child.movement_speed, 5.0);
    }

    #[test]
    fn mutated_traits_stay_within_impact_bounds() {
        let (mother, father) = parents();
        let impact = 0.25;
        let mut rng = SmallRng::seed_from_u64(2);
        for _ in 0..256 {
            let child = blend(&mother.traits, &father.traits, 1.0, impact, &mut rng);
            let checks = [
                (child.max_health, mother.traits.max_health, father.traits.max_health),
                (child.max_energy, mother.traits.max_energy, father.traits.max_energy),
                (child.sight_range, mother.traits.sight_range, father.traits.sight_range),
            ];
            for (value, pa, pb) in checks {
                let lo = pa.min(pb) * (1.0 - impact);
                let hi = pa.max(pb) * (1.0 + impact);
                assert!(
                    (lo..=hi).contains(&value),
                    "{value} outside [{lo}, {hi}]"
                );
            }
        }
    }

    #[test]
    fn litter_size_within_configured_bounds() {
        let (mother, father) = parents();
        let config = WorldConfig::default();
        let species = SpeciesConfig {
            min_children: 2,
            max_children: 5,
            ..config.herbivore.clone()
        };
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..64 {
            let litter = conceive(&mother, &father, &config, &species, &mut rng, Instant::now());
            let count = litter.children.len() as u32;
            assert!((2..=5).contains(&count));
        }
    }

    #[test]
    fn generation_is_max_parent_plus_one() {
        let (mother, father) = parents();
        let config = WorldConfig::default();
        let mut rng = SmallRng::seed_from_u64(4);
        let litter = conceive(
            &mother,
            &father,
            &config,
            &config.herbivore,
            &mut rng,
            Instant::now(),
        );
        assert!(litter.children.iter().all(|c| c.generation == 6));
    }

    #[test]
    fn offspring_gender_varies() {
        let (mother, father) = parents();
        let config = WorldConfig::default();
        let species = SpeciesConfig {
            min_children: 8,
            max_children: 8,
            ..config.herbivore.clone()
        };
        let mut rng = SmallRng::seed_from_u64(5);
        let mut seen_male = false;
        let mut seen_female = false;
        for _ in 0..16 {
            let litter = conceive(&mother, &father, &config, &species, &mut rng, Instant::now());
            for child in &litter.children {
                match child.gender {
                    Gender::Male => seen_male = true,
                    Gender::Female => seen_female = true,
                }
            }
        }
        assert!(seen_male && seen_female);
    }
}
