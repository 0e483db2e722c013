pub mod cancel;
pub mod cron;
pub mod pheromone;
pub mod pool;
pub mod rate;
pub mod safety;
pub mod scheduler;
