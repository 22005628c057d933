//! The configuration-sliced PEPS and its boundary-MPS contraction engine.
//!
//! A [`TensorNetwork2D`] holds one [`SiteTensor`] per lattice site (the PEPS
//! with its physical legs fixed by a [`Configuration`]) and evaluates the
//! scalar contraction of the whole network, i.e. the wavefunction amplitude,
//! together with local variations of it.
//!
//! Contraction proceeds in two stages. First, boundary MPSs are grown inward
//! from two opposite edges of the lattice, one line at a time, with their
//! bond dimension kept in check by the supplied [`TruncatePara`]; the four
//! edges each own a stack of boundary MPSs indexed by the number of lines
//! absorbed. Second, for the line (or pair of lines) of interest, the two
//! bracketing boundary MPSs and the site tensors between them form a ladder
//! whose contraction is exact and is cached rung by rung in a [`BTenCache`].
//! Local queries then cost only a handful of tensor contractions:
//! ```text
//!          A[k]  A[k+1]                       lower   upper
//!   .---.   |     |    .---.                  .---.   .---.
//!   |   |-- T[k]-T[k+1]--|   |  -> trace       |   |---|   |  -> hole at k
//!   | L |   |     |    | R |                  | L | _ | R |
//!   |   |-- B[k]  B[k+1]-|   |                  |   |---|   |
//!   '---'              '---'                  '---'   '---'
//! ```
//!
//! The engine is strictly sequential: grow or move the boundary MPSs, then
//! initialize and grow a boundary-tensor cache, then query and step through the
//! line in order. Any query outside of the cache's frontier fails with an
//! error instead of returning a stale value.

use std::cell::Cell;
use log::trace;
use ndarray as nd;
use num_traits::Zero;
use crate::{
    bmps::BoundaryMps,
    bten::{ self, BTenCache },
    error::{ EngineError, EngineResult },
    lattice::{ Configuration, DiagonalDir, Grid, Orientation, Position, SiteIdx },
    tensor::{ QuantumNumber, TenElem, permute },
    tps::{ SiteTensor, SplitIndexTps },
    truncate::{ TruncatePara, TruncationReport },
};

/// Counters for the work done by a [`TensorNetwork2D`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct EngineStats {
    /// Calls to [`TensorNetwork2D::trace`].
    pub traces: usize,
    /// Calls to any of the `replace_*_trace` methods.
    pub replace_traces: usize,
    /// Calls to [`TensorNetwork2D::punch_hole`].
    pub holes: usize,
    /// Lines absorbed into boundary MPSs.
    pub bmps_steps: usize,
    /// Rungs absorbed into boundary tensors.
    pub bten_steps: usize,
    /// Largest truncation error reported by any boundary-MPS compression.
    pub max_trunc_err: f64,
    /// Largest bond dimension of any boundary MPS produced.
    pub max_bond_dim: usize,
}

type Replacement<'a, A> = (SiteIdx, &'a nd::Array4<A>);

/// A PEPS sliced by a fixed configuration, plus the cached state of its
/// contraction.
#[derive(Clone, Debug)]
pub struct TensorNetwork2D<A, Q> {
    sites: Grid<SiteTensor<A, Q>>,
    config: Configuration,
    bmps: [Vec<BoundaryMps<A>>; 4],
    bten: Option<BTenCache<A>>,
    bten2: Option<BTenCache<A>>,
    stats: Cell<EngineStats>,
}

// site tensor -> (lo, a, hi, b)
fn to_ladder<A: TenElem>(t: &nd::Array4<A>, o: Orientation) -> EngineResult<nd::Array4<A>> {
    let perm: [usize; 4]
        = match o {
            Orientation::Horizontal => [0, 3, 2, 1],
            Orientation::Vertical => [3, 0, 1, 2],
        };
    Ok(permute(t, &perm).into_dimensionality::<nd::Ix4>()?)
}

// (lo, a, hi, b) -> site tensor
fn from_ladder<A: TenElem>(t: &nd::ArrayD<A>, o: Orientation) -> EngineResult<nd::Array4<A>> {
    let perm: [usize; 4]
        = match o {
            Orientation::Horizontal => [0, 3, 2, 1],
            Orientation::Vertical => [1, 2, 3, 0],
        };
    Ok(permute(t, &perm).into_dimensionality::<nd::Ix4>()?)
}

impl<A, Q> TensorNetwork2D<A, Q>
where
    A: TenElem,
    Q: QuantumNumber,
{
    /// Slice `sitps` by `config`.
    ///
    /// Fails if `config` doesn't match the shape of `sitps` or holds a value
    /// outside of some site's local basis.
    pub fn new(sitps: &SplitIndexTps<A, Q>, config: &Configuration) -> EngineResult<Self> {
        let sites = sitps.project(config)?;
        Ok(Self {
            sites,
            config: config.clone(),
            bmps: Default::default(),
            bten: None,
            bten2: None,
            stats: Cell::new(EngineStats::default()),
        })
    }

    pub fn rows(&self) -> usize { self.sites.rows() }

    pub fn cols(&self) -> usize { self.sites.cols() }

    /// Return the configuration the network is sliced by.
    pub fn config(&self) -> &Configuration { &self.config }

    pub fn site(&self, site: SiteIdx) -> EngineResult<&SiteTensor<A, Q>> {
        self.sites.get(site).ok_or(EngineError::SiteOutOfRange(site))
    }

    /// Return the stack of boundary MPSs grown from edge `p`; entry `k` has
    /// `k` lines absorbed.
    pub fn bmps(&self, p: Position) -> &[BoundaryMps<A>] { &self.bmps[p.as_index()] }

    /// Return the single-line boundary-tensor cache, if any.
    pub fn bten(&self) -> Option<&BTenCache<A>> { self.bten.as_ref() }

    /// Return the two-line boundary-tensor cache, if any.
    pub fn bten2(&self) -> Option<&BTenCache<A>> { self.bten2.as_ref() }

    pub fn stats(&self) -> EngineStats { self.stats.get() }

    pub fn reset_stats(&self) { self.stats.set(EngineStats::default()); }

    fn bump<F>(&self, f: F)
    where F: FnOnce(&mut EngineStats)
    {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn record(&self, report: &TruncationReport) {
        self.bump(|s| {
            s.bmps_steps += 1;
            s.max_trunc_err = s.max_trunc_err.max(report.trunc_err);
            s.max_bond_dim = s.max_bond_dim.max(report.bond_dim);
        });
    }

    /// Number of lattice lines with orientation `o`.
    fn num_lines(&self, o: Orientation) -> usize {
        match o {
            Orientation::Horizontal => self.rows(),
            Orientation::Vertical => self.cols(),
        }
    }

    /// Number of sites on a lattice line with orientation `o`.
    fn line_len(&self, o: Orientation) -> usize {
        match o {
            Orientation::Horizontal => self.cols(),
            Orientation::Vertical => self.rows(),
        }
    }

    fn site_at(o: Orientation, line: usize, pos: usize) -> SiteIdx {
        match o {
            Orientation::Horizontal => SiteIdx::new(line, pos),
            Orientation::Vertical => SiteIdx::new(pos, line),
        }
    }

    // (line, position along the line)
    fn locate(&self, site: SiteIdx, o: Orientation) -> EngineResult<(usize, usize)> {
        if !self.sites.contains(site) { return Err(EngineError::SiteOutOfRange(site)); }
        match o {
            Orientation::Horizontal => Ok((site.row, site.col)),
            Orientation::Vertical => Ok((site.col, site.row)),
        }
    }

    fn check_sites(&self, sites: &[SiteIdx]) -> EngineResult<()> {
        match sites.iter().find(|s| !self.sites.contains(**s)) {
            Some(s) => Err(EngineError::SiteOutOfRange(*s)),
            None => Ok(()),
        }
    }

    /*************************************************************************/
    /* boundary MPS                                                          */
    /*************************************************************************/

    // site tensors of `line`, oriented (lo, in, hi, out) for absorption into
    // the boundary MPS grown from `p`
    fn bmps_line_tensors(&self, p: Position, line: usize) -> EngineResult<Vec<nd::Array4<A>>> {
        let o = p.bmps_orientation();
        (0..self.line_len(o))
            .map(|pos| {
                let t = to_ladder(&self.sites[Self::site_at(o, line, pos)].data, o)?;
                if p.is_lower() {
                    Ok(t)
                } else {
                    Ok(permute(&t, &[0, 3, 2, 1]).into_dimensionality::<nd::Ix4>()?)
                }
            })
            .collect()
    }

    // grow the stack from `p` until it holds `target` entries
    fn grow_bmps_stack(&mut self, p: Position, target: usize, trunc: &TruncatePara)
        -> EngineResult<()>
    {
        let o = p.bmps_orientation();
        let lines = self.num_lines(o);
        let idx = p.as_index();
        if self.bmps[idx].is_empty() {
            self.bmps[idx].push(BoundaryMps::trivial(self.line_len(o)));
        }
        while self.bmps[idx].len() < target {
            let depth = self.bmps[idx].len() - 1;
            if depth >= lines { return Err(EngineError::BmpsExhausted(p)); }
            let line = if p.is_lower() { depth } else { lines - 1 - depth };
            let tensors = self.bmps_line_tensors(p, line)?;
            let (next, report) = self.bmps[idx][depth].absorb(&tensors, trunc)?;
            self.record(&report);
            self.bmps[idx].push(next);
        }
        Ok(())
    }

    /// Prepare to sweep inward from edge `p`: the boundary MPSs of the
    /// orthogonal orientation are discarded, the stack from `p` is reset to
    /// its trivial entry, and the stack from the opposite edge is grown over
    /// every line but the first one from `p`.
    pub fn generate_bmps_approach(&mut self, p: Position, trunc: &TruncatePara)
        -> EngineResult<()>
    {
        trunc.validate()?;
        let o = p.bmps_orientation();
        if self.num_lines(o) == 0 || self.line_len(o) == 0 {
            return Err(EngineError::EmptyLattice);
        }
        let (e1, e2) = o.orthogonal().bmps_edges();
        self.bmps[e1.as_index()].clear();
        self.bmps[e2.as_index()].clear();
        self.bmps[p.as_index()] = vec![BoundaryMps::trivial(self.line_len(o))];
        self.grow_bmps_stack(p.opposite(), self.num_lines(o), trunc)?;
        self.prune_caches();
        Ok(())
    }

    /// Grow or shrink the up and down boundary-MPS stacks so that they
    /// bracket `row`.
    pub fn grow_bmps_for_row(&mut self, row: usize, trunc: &TruncatePara)
        -> EngineResult<()>
    {
        self.grow_bmps_for_line(Orientation::Horizontal, row, trunc)
    }

    /// Grow or shrink the left and right boundary-MPS stacks so that they
    /// bracket `col`.
    pub fn grow_bmps_for_col(&mut self, col: usize, trunc: &TruncatePara)
        -> EngineResult<()>
    {
        self.grow_bmps_for_line(Orientation::Vertical, col, trunc)
    }

    fn grow_bmps_for_line(&mut self, o: Orientation, line: usize, trunc: &TruncatePara)
        -> EngineResult<()>
    {
        trunc.validate()?;
        let lines = self.num_lines(o);
        if line >= lines { return Err(EngineError::LineOutOfRange { line, bound: lines }); }
        let (pa, pb) = o.bmps_edges();
        for (p, target) in [(pa, line + 1), (pb, lines - line)] {
            if self.bmps[p.as_index()].len() > target {
                self.bmps[p.as_index()].truncate(target);
            } else {
                self.grow_bmps_stack(p, target, trunc)?;
            }
        }
        self.prune_caches();
        Ok(())
    }

    /// Move the frontier between the stacks from `p` and its opposite one line
    /// toward `p`: the newest boundary MPS from `p` is dropped and the opposite
    /// stack absorbs one more line.
    ///
    /// Fails if either stack hasn't been grown.
    pub fn bmps_move_step(&mut self, p: Position, trunc: &TruncatePara) -> EngineResult<()> {
        trunc.validate()?;
        let opp = p.opposite();
        if self.bmps[p.as_index()].is_empty() {
            return Err(EngineError::BmpsNotGrown(p, 1));
        }
        if self.bmps[opp.as_index()].is_empty() {
            return Err(EngineError::BmpsNotGrown(opp, 1));
        }
        self.bmps[p.as_index()].pop();
        let target = self.bmps[opp.as_index()].len() + 1;
        self.grow_bmps_stack(opp, target, trunc)?;
        self.prune_caches();
        Ok(())
    }

    // the two boundary MPSs bracketing lines `line..line + width`
    fn line_bmps(&self, o: Orientation, line: usize, width: usize)
        -> EngineResult<(&BoundaryMps<A>, &BoundaryMps<A>)>
    {
        let lines = self.num_lines(o);
        if line + width > lines {
            return Err(EngineError::LineOutOfRange { line, bound: lines + 1 - width });
        }
        let (pa, pb) = o.bmps_edges();
        let ib = lines - line - width;
        let a = self.bmps[pa.as_index()].get(line)
            .ok_or(EngineError::BmpsNotGrown(pa, line + 1))?;
        let b = self.bmps[pb.as_index()].get(ib)
            .ok_or(EngineError::BmpsNotGrown(pb, ib + 1))?;
        Ok((a, b))
    }

    /// Grow the boundary MPSs for the last row and contract that row between
    /// them, returning the amplitude of the configuration.
    ///
    /// This reshapes the up and down boundary-MPS stacks.
    pub fn amplitude(&mut self, trunc: &TruncatePara) -> EngineResult<A> {
        let o = Orientation::Horizontal;
        let last = self.rows() - 1;
        self.grow_bmps_for_row(last, trunc)?;
        let (a, b) = self.line_bmps(o, last, 1)?;
        let ones: nd::ArrayD<A> = bten::trivial_env(1);
        let mut env = ones.clone();
        for pos in 0..self.cols() {
            let ts = self.rung(o, last, 1, pos, &[])?;
            env = bten::grow_lower(&env, &a.tensors()[pos], &ts, &b.tensors()[pos])?;
        }
        bten::close(&env, &ones)
    }

    /*************************************************************************/
    /* boundary tensors                                                      */
    /*************************************************************************/

    fn cache(&self, width: usize) -> Option<&BTenCache<A>> {
        if width == 1 { self.bten.as_ref() } else { self.bten2.as_ref() }
    }

    fn cache_mut(&mut self, width: usize) -> Option<&mut BTenCache<A>> {
        if width == 1 { self.bten.as_mut() } else { self.bten2.as_mut() }
    }

    fn set_cache(&mut self, width: usize, cache: Option<BTenCache<A>>) {
        if width == 1 { self.bten = cache; } else { self.bten2 = cache; }
    }

    fn checked_cache(&self, width: usize, o: Orientation, line: usize)
        -> EngineResult<&BTenCache<A>>
    {
        let cache = self.cache(width).ok_or(EngineError::BTenNotInitialized)?;
        if cache.orientation() != o || cache.line() != line {
            return Err(EngineError::BTenLineMismatch(cache.orientation(), cache.line(), line));
        }
        Ok(cache)
    }

    // drop caches whose boundary MPSs are gone
    fn prune_caches(&mut self) {
        for width in [1, 2] {
            let stale
                = self.cache(width)
                .is_some_and(|c| self.line_bmps(c.orientation(), c.line(), width).is_err());
            if stale {
                trace!("dropping width-{} boundary-tensor cache", width);
                self.set_cache(width, None);
            }
        }
    }

    // ladder-frame site tensors at position `pos` of lines `line..line + width`,
    // with replacements applied
    fn rung(
        &self,
        o: Orientation,
        line: usize,
        width: usize,
        pos: usize,
        repl: &[Replacement<'_, A>],
    ) -> EngineResult<Vec<nd::Array4<A>>>
    {
        (0..width)
            .map(|j| {
                let site = Self::site_at(o, line + j, pos);
                let data
                    = repl.iter()
                    .find(|(s, _)| *s == site)
                    .map(|(_, t)| *t)
                    .unwrap_or(&self.sites[site].data);
                to_ladder(data, o)
            })
            .collect()
    }

    fn init_cache(&mut self, width: usize, end: Position, line: usize) -> EngineResult<()> {
        let o = end.bten_orientation();
        self.line_bmps(o, line, width)?;
        let mut cache = BTenCache::new(o, line, width, self.line_len(o));
        cache.seed(end)?;
        self.set_cache(width, Some(cache));
        Ok(())
    }

    // absorb one more rung into the stack grown from `end`
    fn grow_cache_once(&mut self, width: usize, end: Position) -> EngineResult<()> {
        let cache = self.cache(width).ok_or(EngineError::BTenNotInitialized)?;
        let o = cache.orientation();
        let line = cache.line();
        let (pos, env) = cache.growth_point(end)?;
        let (a, b) = self.line_bmps(o, line, width)?;
        let ts = self.rung(o, line, width, pos, &[])?;
        let ua = &a.tensors()[pos];
        let ub = &b.tensors()[pos];
        let next
            = if end.is_lower() {
                bten::grow_lower(env, ua, &ts, ub)?
            } else {
                bten::grow_upper(env, ua, &ts, ub)?
            };
        self.cache_mut(width).ok_or(EngineError::BTenNotInitialized)?.push(end, next)?;
        self.bump(|s| { s.bten_steps += 1; });
        trace!("width-{} boundary tensor from {:?} absorbed {:?} line {} site {}",
            width, end, o, line, pos);
        Ok(())
    }

    fn grow_full(
        &mut self,
        width: usize,
        end: Position,
        line: usize,
        remain: usize,
        init: bool,
    ) -> EngineResult<()>
    {
        let o = end.bten_orientation();
        let current = self.cache(width).map(|c| (c.orientation(), c.line()));
        match current {
            Some((co, cl)) if co == o && cl == line => {
                if init {
                    self.cache_mut(width)
                        .ok_or(EngineError::BTenNotInitialized)?
                        .seed(end)?;
                }
            },
            Some((co, cl)) if !init => {
                return Err(EngineError::BTenLineMismatch(co, cl, line));
            },
            None if !init => { return Err(EngineError::BTenNotInitialized); },
            _ => { self.init_cache(width, end, line)?; },
        }
        let target = self.line_len(o).saturating_sub(remain);
        loop {
            let covered
                = self.cache(width)
                .ok_or(EngineError::BTenNotInitialized)?
                .stack(end)?
                .top()
                .ok_or(EngineError::BTenEmpty(end))?;
            if covered >= target { break; }
            self.grow_cache_once(width, end)?;
        }
        Ok(())
    }

    fn move_step(&mut self, width: usize, d: Position) -> EngineResult<()> {
        let cache = self.cache_mut(width).ok_or(EngineError::BTenNotInitialized)?;
        cache.pop(d)?;
        self.grow_cache_once(width, d.opposite())?;
        self.cache_mut(width)
            .ok_or(EngineError::BTenNotInitialized)?
            .keep_newest(d.opposite(), 2)
    }

    /// Start a new single-line boundary-tensor cache for `line`, seeded with
    /// the trivial boundary tensor at end `end` (`Left`/`Right` for a row,
    /// `Up`/`Down` for a column).
    ///
    /// Fails if the boundary MPSs bracketing `line` haven't been grown.
    pub fn init_bten(&mut self, end: Position, line: usize) -> EngineResult<()> {
        self.init_cache(1, end, line)
    }

    /// Like [`Self::init_bten`], but for the pair of lines `line`, `line + 1`.
    pub fn init_bten2(&mut self, end: Position, line: usize) -> EngineResult<()> {
        self.init_cache(2, end, line)
    }

    /// Grow the stack from `end` of the single-line cache for `line` until
    /// only `remain` sites are left uncovered. If `init` is `true`, the stack
    /// is restarted from the trivial boundary tensor first, creating the cache
    /// if needed.
    pub fn grow_full_bten(&mut self, end: Position, line: usize, remain: usize, init: bool)
        -> EngineResult<()>
    {
        self.grow_full(1, end, line, remain, init)
    }

    /// Like [`Self::grow_full_bten`], but for the two-line cache.
    pub fn grow_full_bten2(&mut self, end: Position, line: usize, remain: usize, init: bool)
        -> EngineResult<()>
    {
        self.grow_full(2, end, line, remain, init)
    }

    /// Move the frontier of the single-line cache one site toward `d`: the
    /// newest boundary tensor grown from `d` is dropped, and the stack from the
    /// opposite end absorbs one more site.
    pub fn bten_move_step(&mut self, d: Position) -> EngineResult<()> {
        self.move_step(1, d)
    }

    /// Like [`Self::bten_move_step`], but for the two-line cache, which must
    /// start at `line`.
    pub fn bten2_move_step(&mut self, d: Position, line: usize) -> EngineResult<()> {
        self.checked_cache(2, d.bten_orientation(), line)?;
        self.move_step(2, d)
    }

    /*************************************************************************/
    /* queries                                                               */
    /*************************************************************************/

    // contract the window of `extent` sites starting at `start`
    fn window_value(
        &self,
        width: usize,
        o: Orientation,
        line: usize,
        start: usize,
        extent: usize,
        repl: &[Replacement<'_, A>],
    ) -> EngineResult<A>
    {
        let cache = self.checked_cache(width, o, line)?;
        let (lower, upper) = cache.window(start, extent)?;
        let (a, b) = self.line_bmps(o, line, width)?;
        let mut env: Option<nd::ArrayD<A>> = None;
        for pos in start..start + extent {
            let ts = self.rung(o, line, width, pos, repl)?;
            let cur = env.as_ref().unwrap_or(lower);
            env = Some(bten::grow_lower(cur, &a.tensors()[pos], &ts, &b.tensors()[pos])?);
        }
        bten::close(env.as_ref().unwrap_or(lower), upper)
    }

    // `true` if the replacement tensors fuse to the same sector as the ones
    // they replace
    fn same_sector(&self, repl: &[(SiteIdx, &SiteTensor<A, Q>)]) -> bool {
        let old = Q::fuse_all(repl.iter().map(|(s, _)| self.sites[*s].div));
        let new = Q::fuse_all(repl.iter().map(|(_, t)| t.div));
        old == new
    }

    /// Return the amplitude, evaluated over the two-site window `site`,
    /// `site + 1` along `o` with the single-line cache.
    pub fn trace(&self, site: SiteIdx, o: Orientation) -> EngineResult<A> {
        let (line, pos) = self.locate(site, o)?;
        self.bump(|s| { s.traces += 1; });
        self.window_value(1, o, line, pos, 2, &[])
    }

    /// Return the amplitude with the tensor at `site` replaced by `t`.
    ///
    /// The single-line cache is queried over whichever window containing
    /// `site` sits at its frontier: the site alone, or the two-site window
    /// starting or ending at `site`.
    pub fn replace_one_site_trace(&self, site: SiteIdx, o: Orientation, t: &SiteTensor<A, Q>)
        -> EngineResult<A>
    {
        let (line, pos) = self.locate(site, o)?;
        self.bump(|s| { s.replace_traces += 1; });
        if !self.same_sector(&[(site, t)]) { return Ok(A::zero()); }
        let cache = self.checked_cache(1, o, line)?;
        let (start, extent)
            = [Some((pos, 1)), Some((pos, 2)), pos.checked_sub(1).map(|p| (p, 2))]
            .into_iter()
            .flatten()
            .find(|(start, extent)| cache.serves(*start, *extent))
            .ok_or(EngineError::OutsideFrontier { start: pos, extent: 1 })?;
        self.window_value(1, o, line, start, extent, &[(site, &t.data)])
    }

    /// Return the amplitude with the tensors at nearest-neighbor sites `site1`
    /// and `site2 = site1 + 1` (along `o`) replaced by `t1` and `t2`. Tensors
    /// in a different symmetry sector give zero.
    pub fn replace_nn_site_trace(
        &self,
        site1: SiteIdx,
        site2: SiteIdx,
        o: Orientation,
        t1: &SiteTensor<A, Q>,
        t2: &SiteTensor<A, Q>,
    ) -> EngineResult<A>
    {
        if site2 != site1.shifted(o, 1) {
            return Err(EngineError::NotNeighbors(site1, site2, o));
        }
        let (line, pos) = self.locate(site1, o)?;
        self.check_sites(&[site2])?;
        self.bump(|s| { s.replace_traces += 1; });
        if !self.same_sector(&[(site1, t1), (site2, t2)]) { return Ok(A::zero()); }
        self.window_value(1, o, line, pos, 2, &[(site1, &t1.data), (site2, &t2.data)])
    }

    /// Return the amplitude with the diagonal pair of sites in the 2x2 block
    /// whose upper-left corner is `anchor` replaced by `t_left` (the site in
    /// the left column) and `t_right` (the site in the right column).
    ///
    /// The two-line cache along `o` is used: it must start at row
    /// `anchor.row` for `Horizontal`, or at column `anchor.col` for
    /// `Vertical`.
    pub fn replace_nnn_site_trace(
        &self,
        anchor: SiteIdx,
        diag: DiagonalDir,
        o: Orientation,
        t_left: &SiteTensor<A, Q>,
        t_right: &SiteTensor<A, Q>,
    ) -> EngineResult<A>
    {
        let SiteIdx { row: r, col: c } = anchor;
        let (left, right)
            = match diag {
                DiagonalDir::LeftDownToRightUp
                    => (SiteIdx::new(r + 1, c), SiteIdx::new(r, c + 1)),
                DiagonalDir::LeftUpToRightDown
                    => (SiteIdx::new(r, c), SiteIdx::new(r + 1, c + 1)),
            };
        self.replace_pair_in_block(anchor, o, 2, (left, t_left), (right, t_right))
    }

    /// Return the amplitude with a pair of sites at distance √5 replaced.
    ///
    /// For `Horizontal`, the pair sits in the 2-row, 3-column block whose
    /// upper-left corner is `anchor`: `(r + 1, c)` and `(r, c + 2)` for
    /// [`DiagonalDir::LeftDownToRightUp`], `(r, c)` and `(r + 1, c + 2)`
    /// otherwise. For `Vertical`, it sits in the 3-row, 2-column block:
    /// `(r + 2, c)` and `(r, c + 1)`, or `(r, c)` and `(r + 2, c + 1)`. The
    /// two-line cache along `o` is used.
    pub fn replace_sqrt5_dist_two_site_trace(
        &self,
        anchor: SiteIdx,
        diag: DiagonalDir,
        o: Orientation,
        t_left: &SiteTensor<A, Q>,
        t_right: &SiteTensor<A, Q>,
    ) -> EngineResult<A>
    {
        let SiteIdx { row: r, col: c } = anchor;
        let (left, right)
            = match (o, diag) {
                (Orientation::Horizontal, DiagonalDir::LeftDownToRightUp)
                    => (SiteIdx::new(r + 1, c), SiteIdx::new(r, c + 2)),
                (Orientation::Horizontal, DiagonalDir::LeftUpToRightDown)
                    => (SiteIdx::new(r, c), SiteIdx::new(r + 1, c + 2)),
                (Orientation::Vertical, DiagonalDir::LeftDownToRightUp)
                    => (SiteIdx::new(r + 2, c), SiteIdx::new(r, c + 1)),
                (Orientation::Vertical, DiagonalDir::LeftUpToRightDown)
                    => (SiteIdx::new(r, c), SiteIdx::new(r + 2, c + 1)),
            };
        self.replace_pair_in_block(anchor, o, 3, (left, t_left), (right, t_right))
    }

    fn replace_pair_in_block(
        &self,
        anchor: SiteIdx,
        o: Orientation,
        extent: usize,
        (s1, t1): (SiteIdx, &SiteTensor<A, Q>),
        (s2, t2): (SiteIdx, &SiteTensor<A, Q>),
    ) -> EngineResult<A>
    {
        let (line, pos) = self.locate(anchor, o)?;
        self.check_sites(&[s1, s2])?;
        self.bump(|s| { s.replace_traces += 1; });
        if !self.same_sector(&[(s1, t1), (s2, t2)]) { return Ok(A::zero()); }
        self.window_value(2, o, line, pos, extent, &[(s1, &t1.data), (s2, &t2.data)])
    }

    /// Return the contraction of the whole network with the tensor at `site`
    /// left out, with legs `[left, down, right, up]` matching the site
    /// tensor's. Fully contracting it with the site tensor gives the amplitude.
    pub fn punch_hole(&self, site: SiteIdx, o: Orientation) -> EngineResult<nd::Array4<A>> {
        let (line, pos) = self.locate(site, o)?;
        let cache = self.checked_cache(1, o, line)?;
        let (lower, upper) = cache.window(pos, 1)?;
        let (a, b) = self.line_bmps(o, line, 1)?;
        let h = bten::hole(lower, &a.tensors()[pos], &b.tensors()[pos], upper)?;
        self.bump(|s| { s.holes += 1; });
        from_ladder(&h, o)
    }

    /*************************************************************************/
    /* updates                                                               */
    /*************************************************************************/

    /// Set `site` to local basis value `value`, swapping in its tensor from
    /// `sitps`.
    ///
    /// Every boundary MPS and boundary tensor that had absorbed `site` is
    /// dropped; caches whose boundary MPSs are dropped go with them.
    pub fn update_site_config(
        &mut self,
        site: SiteIdx,
        value: usize,
        sitps: &SplitIndexTps<A, Q>,
    ) -> EngineResult<()>
    {
        if !self.sites.contains(site) { return Err(EngineError::SiteOutOfRange(site)); }
        let t = sitps.get(site, value)?;
        if t.dims() != self.sites[site].dims() {
            return Err(EngineError::BasisShapeMismatch(site));
        }
        self.sites[site] = t.clone();
        self.config[site] = value;

        let rows = self.rows();
        let cols = self.cols();
        self.bmps[Position::Up.as_index()].truncate(site.row + 1);
        self.bmps[Position::Down.as_index()].truncate(rows - site.row);
        self.bmps[Position::Left.as_index()].truncate(site.col + 1);
        self.bmps[Position::Right.as_index()].truncate(cols - site.col);
        for width in [1, 2] {
            if let Some(cache) = self.cache_mut(width) {
                let o = cache.orientation();
                let (line, pos)
                    = match o {
                        Orientation::Horizontal => (site.row, site.col),
                        Orientation::Vertical => (site.col, site.row),
                    };
                if cache.contains_line(line) { cache.invalidate_pos(pos); }
            }
        }
        self.prune_caches();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use crate::{ tensor::NoSymmetry, truncate::CompressScheme };

    fn setup(rows: usize, cols: usize) -> (SplitIndexTps<f64, NoSymmetry>, Configuration) {
        let mut rng = ChaCha8Rng::seed_from_u64(10546);
        let sitps = SplitIndexTps::random(rows, cols, 2, 2, &mut rng).unwrap();
        let config = Grid::from_fn(rows, cols, |s| (s.row + s.col) % 2);
        (sitps, config)
    }

    fn exact() -> TruncatePara { TruncatePara::new(1, 64, 0.0, CompressScheme::Svd) }

    #[test]
    fn ladder_frames_invert() {
        let t: nd::Array4<f64>
            = nd::Array4::from_shape_fn((1, 2, 3, 4), |(i, j, k, l)| (i + 10 * j + 100 * k + 1000 * l) as f64);
        for o in [Orientation::Horizontal, Orientation::Vertical] {
            let lad = to_ladder(&t, o).unwrap();
            assert_eq!(from_ladder(&lad.into_dyn(), o).unwrap(), t);
        }
        let lad = to_ladder(&t, Orientation::Vertical).unwrap();
        assert_eq!(lad.dim(), (4, 1, 2, 3));
    }

    #[test]
    fn move_before_grow_fails() {
        let (sitps, config) = setup(3, 3);
        let mut tn = TensorNetwork2D::new(&sitps, &config).unwrap();
        assert!(matches!(
            tn.bmps_move_step(Position::Down, &exact()),
            Err(EngineError::BmpsNotGrown(Position::Down, 1)),
        ));
        assert!(matches!(
            tn.init_bten(Position::Left, 0),
            Err(EngineError::BmpsNotGrown(..)),
        ));
        assert!(matches!(
            tn.trace(SiteIdx::new(0, 0), Orientation::Horizontal),
            Err(EngineError::BTenNotInitialized),
        ));
        assert!(matches!(
            tn.bten_move_step(Position::Right),
            Err(EngineError::BTenNotInitialized),
        ));
    }

    #[test]
    fn approach_stack_sizes() {
        let (sitps, config) = setup(3, 4);
        let mut tn = TensorNetwork2D::new(&sitps, &config).unwrap();
        tn.generate_bmps_approach(Position::Up, &exact()).unwrap();
        assert_eq!(tn.bmps(Position::Up).len(), 1);
        assert_eq!(tn.bmps(Position::Down).len(), 3);
        assert_eq!(tn.stats().bmps_steps, 2);
        tn.bmps_move_step(Position::Down, &exact()).unwrap();
        assert_eq!(tn.bmps(Position::Up).len(), 2);
        assert_eq!(tn.bmps(Position::Down).len(), 2);
        tn.grow_bmps_for_col(1, &exact()).unwrap();
        assert_eq!(tn.bmps(Position::Left).len(), 2);
        assert_eq!(tn.bmps(Position::Right).len(), 3);
        tn.generate_bmps_approach(Position::Left, &exact()).unwrap();
        assert!(tn.bmps(Position::Up).is_empty());
        assert_eq!(tn.bmps(Position::Left).len(), 1);
        assert_eq!(tn.bmps(Position::Right).len(), 4);
        assert!(matches!(
            tn.grow_bmps_for_row(3, &exact()),
            Err(EngineError::LineOutOfRange { line: 3, bound: 3 }),
        ));
    }

    #[test]
    fn trace_along_row() {
        let (sitps, config) = setup(3, 4);
        let mut tn = TensorNetwork2D::new(&sitps, &config).unwrap();
        let amp = tn.amplitude(&exact()).unwrap();
        tn.generate_bmps_approach(Position::Up, &exact()).unwrap();
        tn.bmps_move_step(Position::Down, &exact()).unwrap();
        tn.init_bten(Position::Left, 1).unwrap();
        tn.grow_full_bten(Position::Right, 1, 2, true).unwrap();
        for col in 0..3 {
            let site = SiteIdx::new(1, col);
            let tr = tn.trace(site, Orientation::Horizontal).unwrap();
            assert_relative_eq!(tr, amp, max_relative = 1e-10);
            if col < 2 { tn.bten_move_step(Position::Right).unwrap(); }
        }
        // moving past the last window pops the right stack empty
        tn.bten_move_step(Position::Right).unwrap();
        assert!(tn.bten_move_step(Position::Right).is_err());
        assert_eq!(tn.stats().traces, 3);
    }

    #[test]
    fn out_of_order_query_fails() {
        let (sitps, config) = setup(3, 4);
        let mut tn = TensorNetwork2D::new(&sitps, &config).unwrap();
        tn.generate_bmps_approach(Position::Up, &exact()).unwrap();
        tn.init_bten(Position::Left, 0).unwrap();
        tn.grow_full_bten(Position::Right, 0, 2, true).unwrap();
        tn.bten_move_step(Position::Right).unwrap();
        tn.bten_move_step(Position::Right).unwrap();
        assert!(matches!(
            tn.trace(SiteIdx::new(0, 0), Orientation::Horizontal),
            Err(EngineError::OutsideFrontier { .. }),
        ));
        assert!(matches!(
            tn.trace(SiteIdx::new(1, 2), Orientation::Horizontal),
            Err(EngineError::BTenLineMismatch(Orientation::Horizontal, 0, 1)),
        ));
        assert!(tn.trace(SiteIdx::new(0, 2), Orientation::Horizontal).is_ok());
    }

    #[test]
    fn update_invalidates() {
        let (sitps, config) = setup(3, 4);
        let mut tn = TensorNetwork2D::new(&sitps, &config).unwrap();
        tn.generate_bmps_approach(Position::Up, &exact()).unwrap();
        tn.bmps_move_step(Position::Down, &exact()).unwrap();
        tn.init_bten(Position::Left, 1).unwrap();
        tn.grow_full_bten(Position::Right, 1, 2, true).unwrap();
        tn.bten_move_step(Position::Right).unwrap();
        // flipping a site on the cached row, ahead of the frontier, keeps the
        // cache but drops the right-hand boundary tensors covering it
        let site = SiteIdx::new(1, 3);
        let value = 1 - tn.config()[site];
        tn.update_site_config(site, value, &sitps).unwrap();
        assert!(tn.bten().is_some());
        assert!(tn.trace(SiteIdx::new(1, 1), Orientation::Horizontal).is_err());
        // flipping a site on another row drops the cache entirely
        let site = SiteIdx::new(2, 0);
        tn.update_site_config(site, 1 - tn.config()[site], &sitps).unwrap();
        assert!(tn.bten().is_none());
        assert_eq!(tn.bmps(Position::Down).len(), 1);
        assert!(tn.update_site_config(site, 2, &sitps).is_err());
    }
}
